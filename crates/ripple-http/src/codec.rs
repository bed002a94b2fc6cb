use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::any::Any;

use spin::Mutex;

use ripple_core::{
    Bytes, CoreError, Handler, HandlerContext, HandlerDescriptor, InboundHandler, OutboundHandler,
    PipelineMessage, Promise, codes,
};

use crate::message::{HttpRequest, HttpResponse};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 把入站字节流切分为 [`HttpRequest`] 的解码 Handler。
///
/// # 设计动机（Why）
/// - 装配助手需要一个真实可测的解码阶段来证明组合语义；解析覆盖起始行、
///   头域与定长报文体这一最小闭包。
///
/// # 行为概览（How）
/// - 入站字节累积到内部缓冲；每当缓冲中出现完整的"头部 + 定长体"，
///   即切出一个请求向后转发，单次读取可产出多个请求（流水线化输入）；
/// - 不支持的传输编码（chunked）与畸形起始行折叠为
///   `protocol.decode` 错误事件，由链上的错误处理阶段决定善后。
///
/// # 契约说明（What）
/// - **前置条件**：入站消息必须是字节缓冲，业务对象会被折叠为
///   `protocol.type_mismatch` 错误事件；
/// - **后置条件**：解码失败后丢弃缓冲残留，避免在错误的字节边界上反复失败。
pub struct HttpRequestDecoder {
    buffer: Mutex<Bytes>,
}

impl HttpRequestDecoder {
    /// 构造空缓冲的解码器。
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Bytes::new()),
        }
    }

    fn decode_error(message: String) -> CoreError {
        CoreError::new(codes::PROTOCOL_DECODE, message)
    }

    /// 尝试从缓冲头部切出一个完整请求；数据不足时返回 `None`。
    fn try_take_request(buffer: &mut Bytes) -> ripple_core::Result<Option<HttpRequest>> {
        let Some(head_end) = buffer
            .windows(HEAD_TERMINATOR.len())
            .position(|window| window == HEAD_TERMINATOR)
        else {
            return Ok(None);
        };
        let head_text = core::str::from_utf8(&buffer[..head_end])
            .map_err(|_| Self::decode_error("request head is not valid UTF-8".to_string()))?;

        let mut lines = head_text.split("\r\n");
        let start_line = lines
            .next()
            .ok_or_else(|| Self::decode_error("missing request line".to_string()))?;
        let mut parts = start_line.split(' ');
        let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(method), Some(uri), Some(version), None)
                if !method.is_empty() && !uri.is_empty() && version.starts_with("HTTP/") =>
            {
                (method.to_string(), uri.to_string(), version.to_string())
            }
            _ => {
                return Err(Self::decode_error(format!(
                    "malformed request line: {start_line:?}"
                )));
            }
        };

        let mut headers = Vec::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(Self::decode_error(format!("malformed header: {line:?}")));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        if headers
            .iter()
            .any(|(name, value)| {
                name.eq_ignore_ascii_case("transfer-encoding")
                    && !value.eq_ignore_ascii_case("identity")
            })
        {
            return Err(Self::decode_error(
                "chunked transfer encoding is not supported".to_string(),
            ));
        }

        let body_len = match headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        {
            Some((_, value)) => value
                .parse::<usize>()
                .map_err(|_| Self::decode_error(format!("invalid content-length: {value:?}")))?,
            None => 0,
        };

        let body_start = head_end + HEAD_TERMINATOR.len();
        if buffer.len() < body_start + body_len {
            return Ok(None);
        }
        let body = buffer[body_start..body_start + body_len].to_vec();
        buffer.drain(..body_start + body_len);

        Ok(Some(HttpRequest {
            method,
            uri,
            version,
            headers,
            body,
        }))
    }
}

impl Default for HttpRequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for HttpRequestDecoder {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new("ripple.http.request_decoder", "codec", "HTTP/1.1 请求解码")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }

    fn is_removable(&self) -> bool {
        true
    }
}

impl InboundHandler for HttpRequestDecoder {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        let chunk = match msg.expect_buffer() {
            Ok(chunk) => chunk,
            Err(error) => {
                ctx.forward_exception(error);
                return;
            }
        };
        self.buffer.lock().extend_from_slice(&chunk);
        loop {
            let outcome = {
                let mut buffer = self.buffer.lock();
                Self::try_take_request(&mut buffer)
            };
            match outcome {
                Ok(Some(request)) => ctx.forward_read(PipelineMessage::from_user(request)),
                Ok(None) => break,
                Err(error) => {
                    self.buffer.lock().clear();
                    ctx.forward_exception(error);
                    break;
                }
            }
        }
    }
}

/// 把 [`HttpResponse`] 序列化为字节缓冲的编码 Handler。
///
/// # 行为概览（How）
/// - 序列化状态行、既有头域；未显式给出 `Content-Length` 时按报文体长度补齐；
/// - 非响应消息（例如升级后拼接的原始缓冲）原样向前放行。
pub struct HttpResponseEncoder;

impl HttpResponseEncoder {
    /// 构造编码器。
    pub fn new() -> Self {
        Self
    }

    fn serialize(response: &HttpResponse) -> Bytes {
        let mut out = Vec::new();
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", response.status, response.reason).as_bytes(),
        );
        for (name, value) in &response.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if response.header("content-length").is_none() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", response.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&response.body);
        out
    }
}

impl Default for HttpResponseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for HttpResponseEncoder {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new("ripple.http.response_encoder", "codec", "HTTP/1.1 响应编码")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn outbound(&self) -> Option<&dyn OutboundHandler> {
        Some(self)
    }

    fn is_removable(&self) -> bool {
        true
    }
}

impl OutboundHandler for HttpResponseEncoder {
    fn on_write(&self, ctx: &HandlerContext, msg: PipelineMessage, promise: Option<Promise<()>>) {
        match msg.try_into_user::<HttpResponse>() {
            Ok(response) => ctx.write(
                PipelineMessage::from_buffer(Self::serialize(&response)),
                promise,
            ),
            Err(other) => ctx.write(other, promise),
        }
    }
}
