use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::fmt;

use spin::Mutex;

use crate::buffer::{BufferAllocator, PipelineMessage};
use crate::channel::Channel;
use crate::error::{CoreError, codes};
use crate::eventloop::EventLoop;
use crate::future::Promise;
use crate::transport::TransportSocketAddr;

use super::handler::{Handler, UserEvent};
use super::pipeline::ChannelPipeline;

/// 上下文生命周期状态。
///
/// `Init → Added → Removed` 单向推进；`RemovalPending` 是 `Added` 的子态，
/// 表示正式移除握手进行中（节点仍在链上、仍参与分发）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContextState {
    Init,
    Added,
    RemovalPending,
    Removed,
}

/// 一次性移除令牌，绑定到签发它的上下文。
///
/// # 契约说明（What）
/// - 令牌不可克隆：兑现即消耗；
/// - 令牌与上下文错配属于程序员错误，[`HandlerContext::leave_pipeline`] 会 panic；
/// - 通道收尾先行终结节点后，令牌失效，迟到的兑现是无害的 no-op。
#[derive(Debug)]
pub struct RemovalToken {
    context_id: u64,
    sequence: u64,
}

impl RemovalToken {
    pub(crate) fn new(context_id: u64, sequence: u64) -> Self {
        Self {
            context_id,
            sequence,
        }
    }
}

pub(crate) struct PendingRemoval {
    pub(crate) sequence: u64,
    pub(crate) promise: Option<Promise<()>>,
}

/// 流水线节点：承载一个 Handler 及其分发面。
///
/// # 教案式说明
/// - **意图（Why）**：Handler 自身不知道邻居是谁；上下文持有链表指针并代表
///   Handler 执行"向后找入站/向前找出站"的走查，Handler 通过它转发事件、
///   发起出站操作、完成移除握手。
/// - **逻辑（How）**：
///   1. 前向链接为强引用（流水线经 head 独占持有整条链），后向链接为弱引用，
///      避免引用环；
///   2. 走查在推进的瞬间读取当前链接，不做快照——回调中发生的结构变更立即
///      对后续推进可见；
///   3. 节点被摘除时先让邻居绕开自身，但保留自身链接直到 `on_removed` 返回，
///      使回调期间发起的事件仍能按当前链路送达。
/// - **契约（What）**：
///   - 所有分发与变更都发生在通道属主循环上；
///   - 走查把当前节点排除在外：Handler 转发事件不会重入自身；
///   - `Removed` 终态清空 Handler 引用与链接，残留闭包无法复活节点。
/// - **风险提示（Trade-offs）**：链接字段以自旋锁保护，锁只在读写指针的
///   瞬间持有，绝不跨越 Handler 回调，因此单线程重入不会自锁。
pub struct HandlerContext {
    id: u64,
    name: String,
    sentinel: bool,
    pipeline: Weak<ChannelPipeline>,
    event_loop: Arc<dyn EventLoop>,
    handler: Mutex<Option<Arc<dyn Handler>>>,
    prev: Mutex<Weak<HandlerContext>>,
    next: Mutex<Option<Arc<HandlerContext>>>,
    state: Mutex<ContextState>,
    removal: Mutex<Option<PendingRemoval>>,
}

impl HandlerContext {
    pub(crate) fn new(
        id: u64,
        name: String,
        sentinel: bool,
        pipeline: Weak<ChannelPipeline>,
        event_loop: Arc<dyn EventLoop>,
        handler: Arc<dyn Handler>,
        state: ContextState,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            sentinel,
            pipeline,
            event_loop,
            handler: Mutex::new(Some(handler)),
            prev: Mutex::new(Weak::new()),
            next: Mutex::new(None),
            state: Mutex::new(state),
            removal: Mutex::new(None),
        })
    }

    /// 上下文的稳定名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前承载的 Handler；已移除的节点返回 `None`。
    pub fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.lock().clone()
    }

    /// 所属流水线；流水线销毁后返回 `None`。
    pub fn pipeline(&self) -> Option<Arc<ChannelPipeline>> {
        self.pipeline.upgrade()
    }

    /// 所属通道。
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.pipeline.upgrade().and_then(|p| p.channel())
    }

    /// 缓存的属主事件循环。
    pub fn event_loop(&self) -> &Arc<dyn EventLoop> {
        &self.event_loop
    }

    /// 通道的缓冲分配器。
    pub fn allocator(&self) -> Option<Arc<dyn BufferAllocator>> {
        self.channel().map(|c| c.allocator())
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_sentinel(&self) -> bool {
        self.sentinel
    }

    pub(crate) fn state(&self) -> ContextState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ContextState) {
        *self.state.lock() = state;
    }

    pub(crate) fn set_next(&self, next: Option<Arc<HandlerContext>>) {
        *self.next.lock() = next;
    }

    pub(crate) fn set_prev(&self, prev: Weak<HandlerContext>) {
        *self.prev.lock() = prev;
    }

    pub(crate) fn next_context(&self) -> Option<Arc<HandlerContext>> {
        self.next.lock().clone()
    }

    pub(crate) fn prev_context(&self) -> Option<Arc<HandlerContext>> {
        self.prev.lock().upgrade()
    }

    pub(crate) fn begin_removal(&self, sequence: u64, promise: Promise<()>) {
        self.set_state(ContextState::RemovalPending);
        *self.removal.lock() = Some(PendingRemoval {
            sequence,
            promise: Some(promise),
        });
    }

    pub(crate) fn take_removal(&self) -> Option<PendingRemoval> {
        self.removal.lock().take()
    }

    fn handler_arc(&self) -> Option<Arc<dyn Handler>> {
        self.handler.lock().clone()
    }

    fn has_inbound(&self) -> bool {
        self.handler_arc()
            .is_some_and(|handler| handler.inbound().is_some())
    }

    fn has_outbound(&self) -> bool {
        self.handler_arc()
            .is_some_and(|handler| handler.outbound().is_some())
    }

    /// 自当前节点之后寻找首个入站能力节点。走查读取推进瞬间的链接。
    fn next_inbound(&self) -> Option<Arc<HandlerContext>> {
        let mut cursor = self.next_context();
        while let Some(ctx) = cursor {
            if ctx.has_inbound() {
                return Some(ctx);
            }
            cursor = ctx.next_context();
        }
        None
    }

    /// 自当前节点之前寻找首个出站能力节点。
    fn prev_outbound(&self) -> Option<Arc<HandlerContext>> {
        let mut cursor = self.prev_context();
        while let Some(ctx) = cursor {
            if ctx.has_outbound() {
                return Some(ctx);
            }
            cursor = ctx.prev_context();
        }
        None
    }

    fn settle_detached(promise: Option<Promise<()>>) {
        if let Some(promise) = promise {
            promise.fail(CoreError::new(
                codes::CHANNEL_IO_ON_CLOSED,
                "context is no longer linked to a live pipeline",
            ));
        }
    }

    // ---- 入站转发：自 `next` 起寻找首个入站节点并同步调用。 ----

    /// 向后传播"通道已注册"。
    pub fn forward_channel_registered(&self) {
        if let Some(next) = self.next_inbound() {
            next.invoke_channel_registered();
        }
    }

    /// 向后传播"通道活跃"。
    pub fn forward_channel_active(&self) {
        if let Some(next) = self.next_inbound() {
            next.invoke_channel_active();
        }
    }

    /// 向后传播"通道去激活"。
    pub fn forward_channel_inactive(&self) {
        if let Some(next) = self.next_inbound() {
            next.invoke_channel_inactive();
        }
    }

    /// 向后传播一条读消息。
    pub fn forward_read(&self, msg: PipelineMessage) {
        if let Some(next) = self.next_inbound() {
            next.invoke_read(msg);
        }
    }

    /// 向后传播"本轮读取结束"。
    pub fn forward_read_completed(&self) {
        if let Some(next) = self.next_inbound() {
            next.invoke_read_completed();
        }
    }

    /// 向后传播可写性变化。
    pub fn forward_writability_changed(&self) {
        if let Some(next) = self.next_inbound() {
            next.invoke_writability_changed();
        }
    }

    /// 向后传播入站用户事件。
    pub fn forward_user_event(&self, event: UserEvent) {
        if let Some(next) = self.next_inbound() {
            next.invoke_user_event(event);
        }
    }

    /// 向后传播异常。
    pub fn forward_exception(&self, error: CoreError) {
        if let Some(next) = self.next_inbound() {
            next.invoke_exception(error);
        }
    }

    pub(crate) fn invoke_channel_registered(&self) {
        if let Some(handler) = self.handler_arc()
            && let Some(inbound) = handler.inbound()
        {
            inbound.on_channel_registered(self);
        }
    }

    pub(crate) fn invoke_channel_active(&self) {
        if let Some(handler) = self.handler_arc()
            && let Some(inbound) = handler.inbound()
        {
            inbound.on_channel_active(self);
        }
    }

    pub(crate) fn invoke_channel_inactive(&self) {
        if let Some(handler) = self.handler_arc()
            && let Some(inbound) = handler.inbound()
        {
            inbound.on_channel_inactive(self);
        }
    }

    pub(crate) fn invoke_read(&self, msg: PipelineMessage) {
        if let Some(handler) = self.handler_arc() {
            if let Some(inbound) = handler.inbound() {
                inbound.on_read(self, msg);
            }
        }
    }

    pub(crate) fn invoke_read_completed(&self) {
        if let Some(handler) = self.handler_arc()
            && let Some(inbound) = handler.inbound()
        {
            inbound.on_read_complete(self);
        }
    }

    pub(crate) fn invoke_writability_changed(&self) {
        if let Some(handler) = self.handler_arc()
            && let Some(inbound) = handler.inbound()
        {
            inbound.on_writability_changed(self);
        }
    }

    pub(crate) fn invoke_user_event(&self, event: UserEvent) {
        if let Some(handler) = self.handler_arc() {
            if let Some(inbound) = handler.inbound() {
                inbound.on_user_event(self, event);
            }
        }
    }

    pub(crate) fn invoke_exception(&self, error: CoreError) {
        if let Some(handler) = self.handler_arc() {
            if let Some(inbound) = handler.inbound() {
                inbound.on_exception_caught(self, error);
            }
        }
    }

    // ---- 出站发起：自 `prev` 起寻找首个出站节点并同步调用。 ----

    /// 发起注册。
    pub fn register(&self, promise: Option<Promise<()>>) {
        match self.prev_outbound() {
            Some(prev) => prev.invoke_register(promise),
            None => Self::settle_detached(promise),
        }
    }

    /// 发起绑定。
    pub fn bind(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>) {
        match self.prev_outbound() {
            Some(prev) => prev.invoke_bind(addr, promise),
            None => Self::settle_detached(promise),
        }
    }

    /// 发起连接。
    pub fn connect(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>) {
        match self.prev_outbound() {
            Some(prev) => prev.invoke_connect(addr, promise),
            None => Self::settle_detached(promise),
        }
    }

    /// 发起写入。
    pub fn write(&self, msg: PipelineMessage, promise: Option<Promise<()>>) {
        match self.prev_outbound() {
            Some(prev) => prev.invoke_write(msg, promise),
            None => Self::settle_detached(promise),
        }
    }

    /// 发起冲刷。
    pub fn flush(&self) {
        if let Some(prev) = self.prev_outbound() {
            prev.invoke_flush();
        }
    }

    /// 写入并立即冲刷。
    pub fn write_and_flush(&self, msg: PipelineMessage, promise: Option<Promise<()>>) {
        self.write(msg, promise);
        self.flush();
    }

    /// 请求继续读取。
    pub fn read_request(&self) {
        if let Some(prev) = self.prev_outbound() {
            prev.invoke_read_request();
        }
    }

    /// 发起关闭。
    pub fn close(&self, promise: Option<Promise<()>>) {
        match self.prev_outbound() {
            Some(prev) => prev.invoke_close(promise),
            None => Self::settle_detached(promise),
        }
    }

    /// 发起出站用户事件。
    pub fn trigger_user_event(&self, event: UserEvent, promise: Option<Promise<()>>) {
        match self.prev_outbound() {
            Some(prev) => prev.invoke_trigger_user_event(event, promise),
            None => Self::settle_detached(promise),
        }
    }

    pub(crate) fn invoke_register(&self, promise: Option<Promise<()>>) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_register(self, promise);
                return;
            }
        }
        self.register(promise);
    }

    pub(crate) fn invoke_bind(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_bind(self, addr, promise);
                return;
            }
        }
        self.bind(addr, promise);
    }

    pub(crate) fn invoke_connect(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_connect(self, addr, promise);
                return;
            }
        }
        self.connect(addr, promise);
    }

    pub(crate) fn invoke_write(&self, msg: PipelineMessage, promise: Option<Promise<()>>) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_write(self, msg, promise);
                return;
            }
        }
        self.write(msg, promise);
    }

    pub(crate) fn invoke_flush(&self) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_flush(self);
                return;
            }
        }
        self.flush();
    }

    pub(crate) fn invoke_read_request(&self) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_read_request(self);
                return;
            }
        }
        self.read_request();
    }

    pub(crate) fn invoke_close(&self, promise: Option<Promise<()>>) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_close(self, promise);
                return;
            }
        }
        self.close(promise);
    }

    pub(crate) fn invoke_trigger_user_event(
        &self,
        event: UserEvent,
        promise: Option<Promise<()>>,
    ) {
        if let Some(handler) = self.handler_arc() {
            if let Some(outbound) = handler.outbound() {
                outbound.on_trigger_user_event(self, event, promise);
                return;
            }
        }
        self.trigger_user_event(event, promise);
    }

    // ---- 正式移除握手 ----

    /// 兑现移除令牌，完成正式移除握手。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：必须在属主循环上调用；令牌必须由当前节点签发且仍然有效；
    /// - **后置条件**：节点被摘除，`on_removed` 恰好执行一次，移除承诺成功兑现；
    /// - 通道收尾先行终结节点后，迟到的兑现是无害的 no-op；
    /// - 令牌与节点错配、或在无握手状态下兑现，均为程序员错误，直接 panic。
    pub fn leave_pipeline(&self, token: RemovalToken) {
        assert!(
            self.event_loop.in_loop(),
            "leave_pipeline 必须在通道属主循环上调用"
        );
        assert!(
            token.context_id == self.id,
            "removal token 与上下文不匹配（token 属于 #{}，当前节点为 #{}）",
            token.context_id,
            self.id
        );
        let pending = {
            let mut slot = self.removal.lock();
            match slot.take() {
                Some(pending) if pending.sequence == token.sequence => Some(pending),
                Some(pending) => {
                    *slot = Some(pending);
                    panic!("removal token 序号已失效");
                }
                None => None,
            }
        };
        match pending {
            Some(pending) => self.complete_removal(pending.promise),
            None => {
                if self.state() != ContextState::Removed {
                    panic!("leave_pipeline 在没有正式移除握手的情况下被调用");
                }
            }
        }
    }

    /// 摘除节点并执行 `on_removed`。显式移除与通道收尾共用此路径。
    ///
    /// 邻居先绕开自身，但自身链接保留到回调返回之后：`on_removed` 中发起的
    /// 事件仍按当前链路送达下游/上游。
    pub(crate) fn complete_removal(&self, promise: Option<Promise<()>>) {
        let state = self.state();
        if state == ContextState::Removed {
            if let Some(promise) = promise {
                promise.succeed(());
            }
            return;
        }

        let prev = self.prev_context();
        let next = self.next_context();
        if let (Some(prev), Some(next)) = (&prev, &next) {
            prev.set_next(Some(Arc::clone(next)));
            next.set_prev(Arc::downgrade(prev));
        }

        if matches!(state, ContextState::Added | ContextState::RemovalPending)
            && let Some(handler) = self.handler_arc()
        {
            handler.on_removed(self);
        }

        // 自身链接保持原样：节点可能正处于自己的回调栈内（在回调中移除自身），
        // 后续的转发仍须按当前链路送达。邻居已绕开自身，走查不会再进入本节点；
        // Handler 字段清零，残留闭包无法复活 Handler。
        self.set_state(ContextState::Removed);
        *self.handler.lock() = None;

        if let Some(promise) = promise {
            promise.succeed(());
        }
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("name", &self.name)
            .field("sentinel", &self.sentinel)
            .field("state", &*self.state.lock())
            .finish()
    }
}
