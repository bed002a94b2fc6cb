use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

use spin::Mutex;

use ripple_core::{
    ChainEnd, ChannelPipeline, CoreError, DeferredResult, Handler, HandlerContext,
    HandlerDescriptor, InboundHandler, OutboundHandler, PipelineMessage, Promise, UserEvent, codes,
};

use crate::codec::{HttpRequestDecoder, HttpResponseEncoder};
use crate::message::{HttpRequest, HttpResponse};

/// 流水线化辅助：同一时刻只放行一个在途请求。
///
/// # 设计动机（Why）
/// - HTTP/1.1 允许客户端在收到响应前连发多个请求，而业务 Handler 往往假设
///   "一问一答"；本阶段把后续请求暂存，待响应写出后再放行下一个。
///
/// # 行为概览（How）
/// - 入站方向：有在途请求时新请求入队，否则放行并标记在途；
/// - 出站方向：观察到响应通过时，先放行写操作，再把队首请求重新投递给下游。
pub struct HttpPipeliningAssist {
    state: Mutex<AssistState>,
}

struct AssistState {
    in_flight: bool,
    queued: VecDeque<HttpRequest>,
}

impl HttpPipeliningAssist {
    /// 构造空闲状态的辅助阶段。
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AssistState {
                in_flight: false,
                queued: VecDeque::new(),
            }),
        }
    }
}

impl Default for HttpPipeliningAssist {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for HttpPipeliningAssist {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            "ripple.http.pipelining_assist",
            "flow",
            "HTTP/1.1 请求串行化",
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }

    fn outbound(&self) -> Option<&dyn OutboundHandler> {
        Some(self)
    }

    fn is_removable(&self) -> bool {
        true
    }
}

impl InboundHandler for HttpPipeliningAssist {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        match msg.try_into_user::<HttpRequest>() {
            Ok(request) => {
                let release = {
                    let mut state = self.state.lock();
                    if state.in_flight {
                        state.queued.push_back(request);
                        None
                    } else {
                        state.in_flight = true;
                        Some(request)
                    }
                };
                if let Some(request) = release {
                    ctx.forward_read(PipelineMessage::from_user(request));
                }
            }
            Err(other) => ctx.forward_read(other),
        }
    }
}

impl OutboundHandler for HttpPipeliningAssist {
    fn on_write(&self, ctx: &HandlerContext, msg: PipelineMessage, promise: Option<Promise<()>>) {
        let is_response = match &msg {
            PipelineMessage::User(payload) => payload.is::<HttpResponse>(),
            PipelineMessage::Buffer(_) => false,
        };
        ctx.write(msg, promise);
        if is_response {
            let next = {
                let mut state = self.state.lock();
                match state.queued.pop_front() {
                    Some(request) => Some(request),
                    None => {
                        state.in_flight = false;
                        None
                    }
                }
            };
            if let Some(request) = next {
                ctx.forward_read(PipelineMessage::from_user(request));
            }
        }
    }
}

/// 解码失败的善后阶段：回写 400 并关闭连接。
pub struct HttpServerErrorHandler;

impl HttpServerErrorHandler {
    /// 构造善后阶段。
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpServerErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for HttpServerErrorHandler {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new("ripple.http.error_handler", "resilience", "解码失败善后")
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

impl InboundHandler for HttpServerErrorHandler {
    fn on_exception_caught(&self, ctx: &HandlerContext, error: CoreError) {
        if error.is(codes::PROTOCOL_DECODE) {
            let response = HttpResponse::new(400, "Bad Request")
                .with_header("Connection", "close");
            ctx.write_and_flush(PipelineMessage::from_user(response), None);
            ctx.close(None);
        } else {
            ctx.forward_exception(error);
        }
    }
}

/// 升级完成后向下游广播的用户事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpUpgradeCompleted {
    /// 协商出的目标协议。
    pub protocol: String,
}

/// 协议升级配置。
pub struct HttpUpgradeConfig {
    /// `Upgrade:` 头域中匹配的目标协议（大小写不敏感）。
    pub protocol: String,
    /// 升级成功后拼接进链路的替换 Handler。
    pub replacement: Vec<Arc<dyn Handler>>,
}

/// 协议升级阶段：命中升级请求后拆除 HTTP 各阶段并拼入替换协议。
///
/// # 教案式说明
/// - **意图（Why）**：升级是"用公共 API 重组自身所在链路"的典型场景——
///   编码器引用与附属阶段在装配时被捕获，升级时按引用逐个移除。
/// - **逻辑（How）**：
///   1. 命中升级请求后先经既有编码器写出 `101`；
///   2. 按引用移除捕获的 HTTP 阶段（全部走正式移除握手）；
///   3. 把替换 Handler 批量拼到链尾，广播升级完成事件，最后移除自身。
/// - **契约（What）**：未命中升级条件的请求原样放行；替换 Handler 只拼接一次，
///   二次升级请求按普通请求处理。
pub struct HttpUpgradeHandler {
    protocol: String,
    staged: Vec<Arc<dyn Handler>>,
    replacement: Mutex<Option<Vec<Arc<dyn Handler>>>>,
}

impl HttpUpgradeHandler {
    fn new(config: HttpUpgradeConfig, staged: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            protocol: config.protocol,
            staged,
            replacement: Mutex::new(Some(config.replacement)),
        }
    }

    fn matches(&self, request: &HttpRequest) -> bool {
        request
            .header("upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case(&self.protocol))
    }
}

impl Handler for HttpUpgradeHandler {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new("ripple.http.upgrade_handler", "negotiation", "协议升级")
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

impl InboundHandler for HttpUpgradeHandler {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        let request = match msg.try_into_user::<HttpRequest>() {
            Ok(request) => request,
            Err(other) => {
                ctx.forward_read(other);
                return;
            }
        };
        let replacement = if self.matches(&request) {
            self.replacement.lock().take()
        } else {
            None
        };
        let Some(replacement) = replacement else {
            ctx.forward_read(PipelineMessage::from_user(request));
            return;
        };

        let Some(pipeline) = ctx.pipeline() else {
            return;
        };
        // 101 必须先于编码器拆除写出，否则没有阶段能序列化它。
        let accepted = HttpResponse::new(101, "Switching Protocols")
            .with_header("Connection", "Upgrade")
            .with_header("Upgrade", self.protocol.clone());
        ctx.write_and_flush(PipelineMessage::from_user(accepted), None);

        for handler in &self.staged {
            pipeline.remove_handler(handler);
        }
        pipeline.add_handlers(replacement, ChainEnd::Last);
        ctx.forward_user_event(UserEvent::new(HttpUpgradeCompleted {
            protocol: self.protocol.clone(),
        }));
        pipeline.remove_named(ctx.name());
    }
}

/// 服务器侧 HTTP 装配配置。
#[derive(Default)]
pub struct HttpServerStackConfig {
    /// 是否安装流水线化辅助阶段。
    pub with_pipelining_assistance: bool,
    /// 是否安装解码失败善后阶段。
    pub with_error_handling: bool,
    /// 可选的协议升级配置。
    pub upgrade: Option<HttpUpgradeConfig>,
}

/// 通过公共批量插入 API 装配服务器侧 HTTP 阶段。
///
/// # 契约说明（What）
/// - 安装顺序固定：响应编码器、请求解码器、可选流水线化辅助、可选错误善后、
///   可选升级阶段；
/// - 仅使用 [`ChannelPipeline::add_handlers`]，对链路内部结构零假设；
/// - 返回的延迟结果即批量插入的完成凭据。
pub fn install_http_server_stack(
    pipeline: &ChannelPipeline,
    config: HttpServerStackConfig,
    end: ChainEnd,
) -> DeferredResult<()> {
    let encoder: Arc<dyn Handler> = Arc::new(HttpResponseEncoder::new());
    let decoder: Arc<dyn Handler> = Arc::new(HttpRequestDecoder::new());
    let mut handlers: Vec<Arc<dyn Handler>> = alloc::vec![Arc::clone(&encoder), Arc::clone(&decoder)];
    let mut staged: Vec<Arc<dyn Handler>> = alloc::vec![encoder, decoder];

    if config.with_pipelining_assistance {
        let assist: Arc<dyn Handler> = Arc::new(HttpPipeliningAssist::new());
        handlers.push(Arc::clone(&assist));
        staged.push(assist);
    }
    if config.with_error_handling {
        let resilience: Arc<dyn Handler> = Arc::new(HttpServerErrorHandler::new());
        handlers.push(Arc::clone(&resilience));
        staged.push(resilience);
    }
    if let Some(upgrade) = config.upgrade {
        handlers.push(Arc::new(HttpUpgradeHandler::new(upgrade, staged)));
    }

    pipeline.add_handlers(handlers, end)
}
