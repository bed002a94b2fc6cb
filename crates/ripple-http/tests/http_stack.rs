//! HTTP 装配助手的组合语义：编解码往返、善后关闭、请求串行化与协议升级。

use std::any::Any;
use std::sync::{Arc, Mutex};

use ripple_core::{
    ChainEnd, EmbeddedChannel, Handler, HandlerContext, InboundHandler, PipelineMessage, UserEvent,
    codes,
};
use ripple_http::{
    HttpRequest, HttpResponse, HttpServerStackConfig, HttpUpgradeCompleted, HttpUpgradeConfig,
    install_http_server_stack,
};

/// 对每个请求立即回写 `200 ok:<uri>` 的应用层 Handler。
struct Responder;

impl Handler for Responder {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for Responder {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        let request = msg.expect_user::<HttpRequest>().expect("应收到已解码请求");
        let response = HttpResponse::new(200, "OK").with_body(format!("ok:{}", request.uri));
        ctx.write_and_flush(PipelineMessage::from_user(response), None);
    }
}

#[test]
fn request_decode_and_response_encode_round_trip() {
    let channel = EmbeddedChannel::new();
    install_http_server_stack(
        channel.pipeline(),
        HttpServerStackConfig::default(),
        ChainEnd::Last,
    );
    channel
        .pipeline()
        .add_last(None, Arc::new(Responder) as Arc<dyn Handler>);

    let observed = channel
        .write_inbound(PipelineMessage::from_buffer(
            b"GET /health HTTP/1.1\r\nHost: unit\r\n\r\n".to_vec(),
        ))
        .expect("入站注入不应失败");
    assert!(!observed, "请求应被应用层消费而非漏到尾哨兵");

    let bytes = channel
        .read_outbound()
        .expect("应用层应写出响应")
        .try_into_buffer()
        .expect("抵达头哨兵的应是已编码字节");
    let text = String::from_utf8(bytes).expect("响应应为 UTF-8");
    assert!(
        text.starts_with("HTTP/1.1 200 OK\r\n"),
        "状态行不符：{text:?}"
    );
    assert!(
        text.contains("Content-Length: 10\r\n"),
        "应自动补齐报文体长度：{text:?}"
    );
    assert!(text.ends_with("\r\n\r\nok:/health"), "报文体不符：{text:?}");
    assert!(channel.read_outbound().is_none());
}

#[test]
fn partial_head_waits_for_more_bytes() {
    let channel = EmbeddedChannel::new();
    install_http_server_stack(
        channel.pipeline(),
        HttpServerStackConfig::default(),
        ChainEnd::Last,
    );
    channel
        .pipeline()
        .add_last(None, Arc::new(Responder) as Arc<dyn Handler>);

    channel
        .write_inbound(PipelineMessage::from_buffer(b"GET /split HTT".to_vec()))
        .expect("半包不应失败");
    assert!(channel.read_outbound().is_none(), "半包不得产出响应");

    channel
        .write_inbound(PipelineMessage::from_buffer(b"P/1.1\r\n\r\n".to_vec()))
        .expect("补齐不应失败");
    let bytes = channel
        .read_outbound()
        .expect("补齐后应产出响应")
        .try_into_buffer()
        .expect("应为字节");
    assert!(String::from_utf8(bytes).expect("UTF-8").ends_with("ok:/split"));
}

#[test]
fn decode_failure_answers_400_and_closes() {
    let channel = EmbeddedChannel::new();
    install_http_server_stack(
        channel.pipeline(),
        HttpServerStackConfig {
            with_error_handling: true,
            ..HttpServerStackConfig::default()
        },
        ChainEnd::Last,
    );

    channel
        .write_inbound(PipelineMessage::from_buffer(b"BROKEN\r\n\r\n".to_vec()))
        .expect("错误已被善后阶段消费，注入本身不失败");

    let bytes = channel
        .read_outbound()
        .expect("善后阶段应写出 400")
        .try_into_buffer()
        .expect("应为字节");
    let text = String::from_utf8(bytes).expect("UTF-8");
    assert!(
        text.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "状态行不符：{text:?}"
    );
    assert!(text.contains("Connection: close\r\n"));

    let err = channel
        .write_inbound(PipelineMessage::from_buffer(b"GET / HTTP/1.1\r\n\r\n".to_vec()))
        .expect_err("善后阶段应已关闭通道");
    assert!(err.is(codes::CHANNEL_IO_ON_CLOSED));
}

/// 只记录、不回写的应用层 Handler，用于观察串行化闸门。
#[derive(Default)]
struct CollectingResponder {
    seen: Mutex<Vec<String>>,
}

impl Handler for CollectingResponder {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for CollectingResponder {
    fn on_read(&self, _ctx: &HandlerContext, msg: PipelineMessage) {
        let request = msg.expect_user::<HttpRequest>().expect("应收到已解码请求");
        self.seen.lock().expect("seen lock").push(request.uri);
    }
}

#[test]
fn pipelining_assist_serializes_requests() {
    let channel = EmbeddedChannel::new();
    install_http_server_stack(
        channel.pipeline(),
        HttpServerStackConfig {
            with_pipelining_assistance: true,
            ..HttpServerStackConfig::default()
        },
        ChainEnd::Last,
    );
    let responder = Arc::new(CollectingResponder::default());
    channel.pipeline().add_last(None, responder.clone());

    channel
        .write_inbound(PipelineMessage::from_buffer(
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n".to_vec(),
        ))
        .expect("入站注入不应失败");
    assert_eq!(
        responder.seen.lock().expect("seen lock").as_slice(),
        ["/a"],
        "第二个请求必须被闸门扣住"
    );

    let deferred = channel
        .pipeline()
        .write_and_flush(PipelineMessage::from_user(
            HttpResponse::new(200, "OK").with_body("done"),
        ));
    channel.embedded_loop().run();
    assert!(matches!(deferred.try_outcome(), Some(Ok(()))));

    assert_eq!(
        responder.seen.lock().expect("seen lock").as_slice(),
        ["/a", "/b"],
        "响应写出后应放行下一个请求"
    );
    assert!(
        channel.read_outbound().is_some(),
        "已写出的响应应抵达头哨兵"
    );
}

/// 升级后的替换协议：原样回写一切字节。
struct EchoHandler;

impl Handler for EchoHandler {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for EchoHandler {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        let bytes = msg.expect_buffer().expect("升级后应收到原始字节");
        ctx.write_and_flush(PipelineMessage::from_buffer(bytes), None);
    }
}

/// 记录升级完成事件的观察者。
#[derive(Default)]
struct UpgradeObserver {
    protocols: Mutex<Vec<String>>,
}

impl Handler for UpgradeObserver {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for UpgradeObserver {
    fn on_user_event(&self, ctx: &HandlerContext, event: UserEvent) {
        match event.downcast::<HttpUpgradeCompleted>() {
            Ok(completed) => self
                .protocols
                .lock()
                .expect("protocols lock")
                .push(completed.protocol),
            Err(other) => ctx.forward_user_event(other),
        }
    }
}

#[test]
fn upgrade_swaps_http_stage_for_replacement_protocol() {
    let channel = EmbeddedChannel::new();
    install_http_server_stack(
        channel.pipeline(),
        HttpServerStackConfig {
            upgrade: Some(HttpUpgradeConfig {
                protocol: String::from("echo"),
                replacement: vec![Arc::new(EchoHandler) as Arc<dyn Handler>],
            }),
            ..HttpServerStackConfig::default()
        },
        ChainEnd::Last,
    );
    let observer = Arc::new(UpgradeObserver::default());
    channel.pipeline().add_last(None, observer.clone());

    channel
        .write_inbound(PipelineMessage::from_buffer(
            b"GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n".to_vec(),
        ))
        .expect("升级请求不应失败");

    let bytes = channel
        .read_outbound()
        .expect("应写出 101")
        .try_into_buffer()
        .expect("应为字节");
    assert!(
        String::from_utf8(bytes)
            .expect("UTF-8")
            .starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
        "升级响应必须先于阶段拆除写出"
    );
    assert_eq!(
        observer.protocols.lock().expect("protocols lock").as_slice(),
        ["echo"],
        "下游应观察到升级完成事件"
    );
    assert_eq!(
        channel.pipeline().handler_names().len(),
        2,
        "链上应只剩观察者与替换协议"
    );

    channel
        .write_inbound(PipelineMessage::from_buffer(b"ping".to_vec()))
        .expect("升级后的原始字节不应失败");
    let echoed = channel
        .read_outbound()
        .expect("回显应抵达头哨兵")
        .try_into_buffer()
        .expect("应为字节");
    assert_eq!(echoed, b"ping", "回显必须绕过已拆除的编码器");
}
