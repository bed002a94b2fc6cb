use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::format;
use core::any::Any;
use core::fmt;

use crate::buffer::PipelineMessage;
use crate::error::CoreError;
use crate::future::Promise;
use crate::transport::TransportSocketAddr;

use super::context::{HandlerContext, RemovalToken};

/// 描述 Handler 的元数据，辅助链路编排与可观测性。
///
/// # 设计背景（Why）
/// - 借鉴 Filter Metadata / Layer Describe 模式，帮助日志与 introspection
///   识别组件用途；日志标签统一取自此处。
///
/// # 契约说明（What）
/// - `name`：组件的稳定标识，建议使用 `vendor.component` 命名。
/// - `category`：可选分类（如 `codec`、`routing`）。
/// - `summary`：人类可读描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerDescriptor {
    name: Cow<'static, str>,
    category: Cow<'static, str>,
    summary: Cow<'static, str>,
}

impl HandlerDescriptor {
    /// 构造新的描述对象。
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        category: impl Into<Cow<'static, str>>,
        summary: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            summary: summary.into(),
        }
    }

    /// 构造匿名描述，常用于测试或快速原型。
    pub fn anonymous(stage: impl Into<Cow<'static, str>>) -> Self {
        let stage = stage.into();
        Self {
            name: Cow::Owned(format!("anonymous.{}", stage)),
            category: Cow::Borrowed("unspecified"),
            summary: Cow::Owned(format!("auto-generated descriptor for {}", stage)),
        }
    }

    /// 获取名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取类别。
    pub fn category(&self) -> &str {
        &self.category
    }

    /// 获取摘要。
    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// 在链路上双向传递的用户事件信封。
///
/// # 契约说明（What）
/// - 框架不解释事件内容，仅按入站/出站方向透传；
/// - 消费方通过 `downcast` 做安全下转型，失败时应原样向后转发。
pub struct UserEvent(Box<dyn Any + Send + Sync>);

impl UserEvent {
    /// 包装任意线程安全对象为用户事件。
    pub fn new<T: Any + Send + Sync>(event: T) -> Self {
        Self(Box::new(event))
    }

    /// 判断事件是否为指定类型。
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// 以引用视角读取事件内容。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// 尝试取出事件内容；类型不符时原样退还信封。
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(other) => Err(Self(other)),
        }
    }
}

impl fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UserEvent").field(&"<erased-event>").finish()
    }
}

/// 入站事件处理合约，面向从传输层到业务层的正向数据流。
///
/// # 设计背景（Why）
/// - 入站事件沿 `head → tail` 方向逐节点传播；未覆写的方法默认把事件转发给
///   下一个具备入站能力的节点，因此实现者只需关心感兴趣的事件。
///
/// # 契约说明（What）
/// - 所有方法均在通道属主循环上被同步调用，必须无阻塞；
/// - 事件一旦不再调用 `forward_*`，传播即在当前节点停止；
/// - 异常需经 `on_exception_caught` 链路传播，必要时触发降级或关闭连接。
///
/// # 风险提示（Trade-offs）
/// - 请避免在 Handler 内部长期持有 [`HandlerContext`] 的引用；确有需要时应
///   克隆 `Arc` 并注意不要在移除后继续使用。
pub trait InboundHandler: Send + Sync + 'static {
    /// 通道完成注册。
    fn on_channel_registered(&self, ctx: &HandlerContext) {
        ctx.forward_channel_registered();
    }

    /// 通道变为活跃。
    fn on_channel_active(&self, ctx: &HandlerContext) {
        ctx.forward_channel_active();
    }

    /// 通道不再活跃。
    fn on_channel_inactive(&self, ctx: &HandlerContext) {
        ctx.forward_channel_inactive();
    }

    /// 处理读到的消息。
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        ctx.forward_read(msg);
    }

    /// 一批读取完成。
    fn on_read_complete(&self, ctx: &HandlerContext) {
        ctx.forward_read_completed();
    }

    /// 可写性变化。
    fn on_writability_changed(&self, ctx: &HandlerContext) {
        ctx.forward_writability_changed();
    }

    /// 入站用户事件。
    fn on_user_event(&self, ctx: &HandlerContext, event: UserEvent) {
        ctx.forward_user_event(event);
    }

    /// 异常处理。
    fn on_exception_caught(&self, ctx: &HandlerContext, error: CoreError) {
        ctx.forward_exception(error);
    }
}

/// 出站事件处理合约，负责从业务层到传输层的逆向数据流。
///
/// # 设计背景（Why）
/// - 出站操作沿 `发起点 → head` 方向逐节点传播；未覆写的方法默认把操作交给
///   前一个具备出站能力的节点。
///
/// # 契约说明（What）
/// - 可失败操作附带可选承诺：实现完成转换后应把承诺继续向前传递，或在
///   本地终结时自行兑现；
/// - 所有方法均在通道属主循环上被同步调用。
pub trait OutboundHandler: Send + Sync + 'static {
    /// 注册传输。
    fn on_register(&self, ctx: &HandlerContext, promise: Option<Promise<()>>) {
        ctx.register(promise);
    }

    /// 绑定本地地址。
    fn on_bind(
        &self,
        ctx: &HandlerContext,
        addr: TransportSocketAddr,
        promise: Option<Promise<()>>,
    ) {
        ctx.bind(addr, promise);
    }

    /// 连接远端地址。
    fn on_connect(
        &self,
        ctx: &HandlerContext,
        addr: TransportSocketAddr,
        promise: Option<Promise<()>>,
    ) {
        ctx.connect(addr, promise);
    }

    /// 写入消息。
    fn on_write(&self, ctx: &HandlerContext, msg: PipelineMessage, promise: Option<Promise<()>>) {
        ctx.write(msg, promise);
    }

    /// 刷新写缓冲。
    fn on_flush(&self, ctx: &HandlerContext) {
        ctx.flush();
    }

    /// 请求继续读取。
    fn on_read_request(&self, ctx: &HandlerContext) {
        ctx.read_request();
    }

    /// 关闭通道。
    fn on_close(&self, ctx: &HandlerContext, promise: Option<Promise<()>>) {
        ctx.close(promise);
    }

    /// 出站用户事件。
    fn on_trigger_user_event(
        &self,
        ctx: &HandlerContext,
        event: UserEvent,
        promise: Option<Promise<()>>,
    ) {
        ctx.trigger_user_event(event, promise);
    }
}

/// 统一的 Handler 合约：能力声明 + 生命周期回调。
///
/// # 教案式说明
/// - **意图（Why）**：链路节点需要在不了解具体类型的情况下回答三个问题——
///   该 Handler 是否处理入站/出站事件、能否被用户移除、如何执行生命周期回调。
///   把能力声明集中到一个伞形合约上，事件走查只需一次动态查询。
/// - **逻辑（How）**：`inbound`/`outbound` 返回对应能力视图（`None` 表示该方向
///   事件直接跳过本节点）；`as_any` 支撑按具体类型查找；`is_removable` 与
///   `on_removal_requested` 共同构成正式移除握手。
/// - **契约（What）**：
///   - 每次成功加入流水线，`on_added` 恰好执行一次；无论显式移除还是通道收尾，
///     `on_removed` 恰好执行一次且晚于 `on_added`；
///   - 声明了可移除能力的 Handler 收到 `on_removal_requested` 后，必须最终调用
///     [`HandlerContext::leave_pipeline`] 兑现令牌（默认实现立即兑现），或者
///     放任通道收尾代为终结；
///   - 未声明可移除能力的 Handler 只会被通道收尾移除。
/// - **风险提示（Trade-offs）**：能力视图以借用返回，避免每次分发克隆 `Arc`；
///   代价是实现者需写一行 `Some(self)` 样板。
pub trait Handler: Send + Sync + 'static {
    /// 返回 Handler 的静态描述信息，用于日志标签与 introspection。
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::anonymous("handler")
    }

    /// 以 `Any` 视角暴露自身，支撑按具体类型查找。
    fn as_any(&self) -> &dyn Any;

    /// 入站能力视图；`None` 表示入站事件跳过本节点。
    fn inbound(&self) -> Option<&dyn InboundHandler> {
        None
    }

    /// 出站能力视图；`None` 表示出站操作跳过本节点。
    fn outbound(&self) -> Option<&dyn OutboundHandler> {
        None
    }

    /// 是否声明可被用户移除。
    fn is_removable(&self) -> bool {
        false
    }

    /// 成功加入流水线后回调。
    fn on_added(&self, ctx: &HandlerContext) {
        let _ = ctx;
    }

    /// 从流水线移除后回调。
    fn on_removed(&self, ctx: &HandlerContext) {
        let _ = ctx;
    }

    /// 正式移除握手：收到一次性令牌，可先排空在途工作再离开。
    fn on_removal_requested(&self, ctx: &HandlerContext, token: RemovalToken) {
        ctx.leave_pipeline(token);
    }
}
