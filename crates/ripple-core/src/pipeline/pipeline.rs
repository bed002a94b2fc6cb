use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::buffer::PipelineMessage;
use crate::channel::{Channel, ChannelState};
use crate::error::{CoreError, codes};
use crate::eventloop::EventLoop;
use crate::future::{DeferredResult, Promise};
use crate::observability::{KeyValue, Logger};
use crate::transport::TransportSocketAddr;

use super::context::{ContextState, HandlerContext, RemovalToken};
use super::handler::{Handler, UserEvent};
use super::sentinel::{HeadSentinel, TailSentinel};

/// 头哨兵的保留名称。
pub(crate) const HEAD_NAME: &str = "head";
/// 尾哨兵的保留名称。
pub(crate) const TAIL_NAME: &str = "tail";

/// 插入锚点：以 Handler 引用、上下文或名称定位链上已有节点。
///
/// # 契约说明（What）
/// - 锚点必须指向当前仍在链上的非哨兵节点，否则变更以
///   `pipeline.handler_not_found` 失败。
pub enum PipelineAnchor {
    /// 以 Handler 引用定位（指针同一性）。
    Handler(Arc<dyn Handler>),
    /// 以上下文定位。
    Context(Arc<HandlerContext>),
    /// 以名称定位。
    Name(String),
}

/// 单个 Handler 的插入位置。
pub enum HandlerPosition {
    /// 紧随头哨兵之后。
    First,
    /// 紧贴尾哨兵之前。
    Last,
    /// 在锚点之前。
    Before(PipelineAnchor),
    /// 在锚点之后。
    After(PipelineAnchor),
}

/// 批量插入的锚定端：批量操作只以链表端点为锚，保证原子性论证简单。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainEnd {
    /// 头端（紧随头哨兵）。
    First,
    /// 尾端（紧贴尾哨兵）。
    Last,
}

/// 通道流水线：哨兵括起的双向 Handler 链。
///
/// # 教案式说明
/// - **意图（Why）**：流水线是框架的脊柱——每个入站事件、出站操作与生命周期
///   信号都沿这条链流动；同时它必须支持事件在途时的结构热变更。
/// - **逻辑（How）**：
///   1. 链表由 head 起经强引用串至 tail，反向为弱引用；流水线独占持有两个哨兵；
///   2. 所有结构变更与事件分发都被折返到通道属主循环：环内调用同步生效，
///      环外调用经 `EventLoop::execute` 排队；
///   3. 每个变更返回延迟结果，在结构编辑与生命周期回调完成之后兑现——且始终
///      经循环队列兑现，续体不会在调用方栈帧内重入执行。
/// - **契约（What）**：
///   - 链表良构：任意节点 `c` 满足 `c.prev.next == c` 且 `c.next.prev == c`；
///   - 恰好一个 head、一个 tail，次序固定，贯穿流水线全生命周期；
///   - 哨兵不可移除、不可按名称/类型检索；
///   - 每次成功加入的 Handler，`on_added` 与 `on_removed` 恰好各执行一次，
///     且次序固定；
///   - 通道进入 `Closed` 后的新增以 `channel.io_on_closed` 失败，生命周期
///     回调不会被触达。
/// - **风险提示（Trade-offs）**：走查是线性扫描；典型链路深度很小（<16），
///   不值得为此引入跳表或缓存。
pub struct ChannelPipeline {
    channel: Weak<dyn Channel>,
    event_loop: Arc<dyn EventLoop>,
    logger: Arc<dyn Logger>,
    head: Arc<HandlerContext>,
    tail: Arc<HandlerContext>,
    sequence: AtomicU64,
    auto_names: AtomicU64,
    destroyed: AtomicBool,
    self_ref: Weak<ChannelPipeline>,
}

impl ChannelPipeline {
    /// 构造新的流水线并装好哨兵。
    ///
    /// # 契约说明（What）
    /// - `channel` 以弱引用传入：通道强持流水线，反向必须为弱，否则成环泄漏；
    /// - 哨兵在此处一次性链接完毕，此后直到销毁不再变动。
    pub fn new(
        channel: Weak<dyn Channel>,
        event_loop: Arc<dyn EventLoop>,
        logger: Arc<dyn Logger>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ChannelPipeline>| {
            let head = HandlerContext::new(
                0,
                String::from(HEAD_NAME),
                true,
                weak.clone(),
                Arc::clone(&event_loop),
                Arc::new(HeadSentinel),
                ContextState::Added,
            );
            let tail = HandlerContext::new(
                1,
                String::from(TAIL_NAME),
                true,
                weak.clone(),
                Arc::clone(&event_loop),
                Arc::new(TailSentinel),
                ContextState::Added,
            );
            head.set_next(Some(Arc::clone(&tail)));
            tail.set_prev(Arc::downgrade(&head));
            Self {
                channel,
                event_loop,
                logger,
                head,
                tail,
                sequence: AtomicU64::new(2),
                auto_names: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
                self_ref: weak.clone(),
            }
        })
    }

    /// 所属通道；通道销毁后返回 `None`。
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.upgrade()
    }

    /// 属主事件循环。
    pub fn event_loop(&self) -> &Arc<dyn EventLoop> {
        &self.event_loop
    }

    pub(crate) fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn is_closed(&self) -> bool {
        if self.destroyed.load(Ordering::SeqCst) {
            return true;
        }
        match self.channel.upgrade() {
            Some(channel) => channel.state() == ChannelState::Closed,
            None => true,
        }
    }

    /// 在属主循环上执行任务：环内同步，环外经循环队列折返。
    fn run_on_loop(&self, task: impl FnOnce(&ChannelPipeline) + Send + 'static) {
        if self.event_loop.in_loop() {
            task(self);
        } else {
            let weak = self.self_ref.clone();
            self.event_loop.execute(Box::new(move || {
                if let Some(pipeline) = weak.upgrade() {
                    task(&pipeline);
                }
            }));
        }
    }

    /// 在属主循环上执行带承诺的操作，返回其读取半边。
    fn submit(
        &self,
        operation: impl FnOnce(&ChannelPipeline, Promise<()>) + Send + 'static,
    ) -> DeferredResult<()> {
        let promise = Promise::new(Arc::clone(&self.event_loop));
        let deferred = promise.deferred();
        if self.event_loop.in_loop() {
            operation(self, promise);
        } else {
            let weak = self.self_ref.clone();
            self.event_loop.execute(Box::new(move || match weak.upgrade() {
                Some(pipeline) => operation(&pipeline, promise),
                None => promise.fail(CoreError::new(
                    codes::CHANNEL_IO_ON_CLOSED,
                    "pipeline was dropped before the operation ran",
                )),
            }));
        }
        deferred
    }

    // ---- 结构变更 ----

    /// 插入单个 Handler。
    ///
    /// # 契约说明（What）
    /// - `name` 省略时自动生成链内唯一名称；显式名称与现存（或保留）名称冲突
    ///   以 `pipeline.duplicate_name` 失败；
    /// - 锚点失效以 `pipeline.handler_not_found` 失败；
    /// - 通道已关闭以 `channel.io_on_closed` 失败，且 `on_added` 不会执行；
    /// - 返回的延迟结果在结构编辑与 `on_added` 完成后成功兑现。
    pub fn add_handler(
        &self,
        handler: Arc<dyn Handler>,
        name: Option<String>,
        position: HandlerPosition,
    ) -> DeferredResult<()> {
        self.submit(move |pipeline, promise| pipeline.add0(handler, name, position, promise))
    }

    /// 语法糖：插到链头。
    pub fn add_first(&self, name: Option<String>, handler: Arc<dyn Handler>) -> DeferredResult<()> {
        self.add_handler(handler, name, HandlerPosition::First)
    }

    /// 语法糖：插到链尾。
    pub fn add_last(&self, name: Option<String>, handler: Arc<dyn Handler>) -> DeferredResult<()> {
        self.add_handler(handler, name, HandlerPosition::Last)
    }

    /// 批量插入：锚定在链表端点，整批要么全部入链、要么一个不入。
    ///
    /// # 契约说明（What）
    /// - 名称全部自动生成，批内不存在命名冲突路径；
    /// - 唯一的失败前件是通道已关闭，此时任何 Handler 的 `on_added` 都不执行；
    /// - `on_added` 按插入顺序逐个执行，期间的结构变更立即生效。
    pub fn add_handlers(
        &self,
        handlers: Vec<Arc<dyn Handler>>,
        end: ChainEnd,
    ) -> DeferredResult<()> {
        self.submit(move |pipeline, promise| pipeline.add_multiple0(handlers, end, promise))
    }

    fn add0(
        &self,
        handler: Arc<dyn Handler>,
        name: Option<String>,
        position: HandlerPosition,
        promise: Promise<()>,
    ) {
        if self.is_closed() {
            promise.fail(CoreError::new(
                codes::CHANNEL_IO_ON_CLOSED,
                "cannot add a handler to a closed channel",
            ));
            return;
        }
        let name = match name {
            Some(name) => {
                if let Err(error) = self.validate_name(&name) {
                    promise.fail(error);
                    return;
                }
                name
            }
            None => self.generate_name(),
        };
        let (prev, next) = match self.resolve_position(position) {
            Ok(pair) => pair,
            Err(error) => {
                promise.fail(error);
                return;
            }
        };
        let ctx = self.link_between(&prev, &next, name, Arc::clone(&handler));
        self.log_mutation("pipeline handler added", ctx.name());
        ctx.set_state(ContextState::Added);
        handler.on_added(&ctx);
        promise.succeed(());
    }

    fn add_multiple0(&self, handlers: Vec<Arc<dyn Handler>>, end: ChainEnd, promise: Promise<()>) {
        if self.is_closed() {
            promise.fail(CoreError::new(
                codes::CHANNEL_IO_ON_CLOSED,
                "cannot add handlers to a closed channel",
            ));
            return;
        }
        if handlers.is_empty() {
            promise.succeed(());
            return;
        }
        let (mut prev, next) = match end {
            ChainEnd::First => (
                Arc::clone(&self.head),
                self.head.next_context().expect("head 永远有后继"),
            ),
            ChainEnd::Last => (
                self.tail.prev_context().expect("tail 永远有前驱"),
                Arc::clone(&self.tail),
            ),
        };
        // 先整批链接，再统一触发回调：结构原子性与回调顺序解耦。
        let mut linked = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let name = self.generate_name();
            let ctx = self.link_between(&prev, &next, name, Arc::clone(&handler));
            prev = Arc::clone(&ctx);
            linked.push((handler, ctx));
        }
        for (handler, ctx) in &linked {
            // 回调中可能移除批内后续节点；只对仍处于初始态的节点宣告加入。
            if ctx.state() == ContextState::Init {
                self.log_mutation("pipeline handler added", ctx.name());
                ctx.set_state(ContextState::Added);
                handler.on_added(ctx);
            }
        }
        promise.succeed(());
    }

    fn link_between(
        &self,
        prev: &Arc<HandlerContext>,
        next: &Arc<HandlerContext>,
        name: String,
        handler: Arc<dyn Handler>,
    ) -> Arc<HandlerContext> {
        let ctx = HandlerContext::new(
            self.next_sequence(),
            name,
            false,
            self.self_ref.clone(),
            Arc::clone(&self.event_loop),
            handler,
            ContextState::Init,
        );
        prev.set_next(Some(Arc::clone(&ctx)));
        ctx.set_prev(Arc::downgrade(prev));
        ctx.set_next(Some(Arc::clone(next)));
        next.set_prev(Arc::downgrade(&ctx));
        ctx
    }

    fn validate_name(&self, name: &str) -> crate::Result<()> {
        if name == HEAD_NAME || name == TAIL_NAME {
            return Err(CoreError::new(
                codes::PIPELINE_DUPLICATE_NAME,
                alloc::format!("name '{name}' is reserved"),
            ));
        }
        if self.find_by_name(name).is_some() {
            return Err(CoreError::new(
                codes::PIPELINE_DUPLICATE_NAME,
                alloc::format!("a handler named '{name}' already exists"),
            ));
        }
        Ok(())
    }

    fn generate_name(&self) -> String {
        loop {
            let candidate = alloc::format!(
                "handler{}",
                self.auto_names.fetch_add(1, Ordering::Relaxed)
            );
            if candidate != HEAD_NAME
                && candidate != TAIL_NAME
                && self.find_by_name(&candidate).is_none()
            {
                return candidate;
            }
        }
    }

    fn resolve_position(
        &self,
        position: HandlerPosition,
    ) -> crate::Result<(Arc<HandlerContext>, Arc<HandlerContext>)> {
        match position {
            HandlerPosition::First => Ok((
                Arc::clone(&self.head),
                self.head.next_context().expect("head 永远有后继"),
            )),
            HandlerPosition::Last => Ok((
                self.tail.prev_context().expect("tail 永远有前驱"),
                Arc::clone(&self.tail),
            )),
            HandlerPosition::After(anchor) => {
                let ctx = self.resolve_anchor(anchor)?;
                let next = ctx.next_context().ok_or_else(Self::not_found)?;
                Ok((ctx, next))
            }
            HandlerPosition::Before(anchor) => {
                let ctx = self.resolve_anchor(anchor)?;
                let prev = ctx.prev_context().ok_or_else(Self::not_found)?;
                Ok((prev, ctx))
            }
        }
    }

    fn resolve_anchor(&self, anchor: PipelineAnchor) -> crate::Result<Arc<HandlerContext>> {
        let resolved = match anchor {
            PipelineAnchor::Handler(handler) => self.find_by_handler(&handler),
            PipelineAnchor::Name(name) => self.find_by_name(&name),
            PipelineAnchor::Context(ctx) => self
                .user_contexts()
                .into_iter()
                .find(|candidate| Arc::ptr_eq(candidate, &ctx)),
        };
        resolved.ok_or_else(Self::not_found)
    }

    fn not_found() -> CoreError {
        CoreError::new(
            codes::PIPELINE_HANDLER_NOT_FOUND,
            "no matching handler in this pipeline",
        )
    }

    // ---- 移除：三种拼写，同一握手 ----

    /// 按 Handler 引用移除。
    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> DeferredResult<()> {
        let handler = Arc::clone(handler);
        self.submit(move |pipeline, promise| {
            let target = pipeline.find_by_handler(&handler);
            pipeline.remove0(target, promise);
        })
    }

    /// 按名称移除。
    pub fn remove_named(&self, name: &str) -> DeferredResult<()> {
        let name = name.to_string();
        self.submit(move |pipeline, promise| {
            let target = pipeline.find_by_name(&name);
            pipeline.remove0(target, promise);
        })
    }

    /// 按上下文移除。
    pub fn remove_context(&self, ctx: &Arc<HandlerContext>) -> DeferredResult<()> {
        let ctx = Arc::clone(ctx);
        self.submit(move |pipeline, promise| {
            let target = pipeline
                .user_contexts()
                .into_iter()
                .find(|candidate| Arc::ptr_eq(candidate, &ctx));
            pipeline.remove0(target, promise);
        })
    }

    /// 移除的公共路径：能力校验 → 挂起握手 → 签发令牌。
    ///
    /// # 契约说明（What）
    /// - 未声明可移除能力的 Handler 以 `pipeline.unremovable_handler` 失败，
    ///   链路不发生任何变化；
    /// - 同一节点重复发起移除，后到者以 `pipeline.handler_not_found` 失败
    ///   （节点已在离场途中）；
    /// - 握手未兑现时节点仍在链上、照常分发；承诺在 `on_removed` 返回后兑现。
    fn remove0(&self, target: Option<Arc<HandlerContext>>, promise: Promise<()>) {
        let Some(ctx) = target else {
            promise.fail(Self::not_found());
            return;
        };
        let Some(handler) = ctx.handler() else {
            promise.fail(Self::not_found());
            return;
        };
        if !handler.is_removable() {
            promise.fail(CoreError::new(
                codes::PIPELINE_UNREMOVABLE_HANDLER,
                alloc::format!("handler '{}' does not support removal", ctx.name()),
            ));
            return;
        }
        match ctx.state() {
            ContextState::Added => {}
            ContextState::RemovalPending => {
                promise.fail(CoreError::new(
                    codes::PIPELINE_HANDLER_NOT_FOUND,
                    alloc::format!("handler '{}' is already being removed", ctx.name()),
                ));
                return;
            }
            _ => {
                promise.fail(Self::not_found());
                return;
            }
        }
        let sequence = self.next_sequence();
        ctx.begin_removal(sequence, promise);
        self.log_mutation("pipeline handler removal requested", ctx.name());
        handler.on_removal_requested(&ctx, RemovalToken::new(ctx.id(), sequence));
    }

    // ---- 检索 ----

    /// 按名称检索上下文；哨兵不可见。
    pub fn context_named(&self, name: &str) -> crate::Result<Arc<HandlerContext>> {
        self.find_by_name(name).ok_or_else(Self::not_found)
    }

    /// 按 Handler 具体类型检索首个匹配（正向次序）；哨兵不可见。
    pub fn context_of_type<H: Handler>(&self) -> crate::Result<Arc<HandlerContext>> {
        self.user_contexts()
            .into_iter()
            .find(|ctx| {
                ctx.handler()
                    .is_some_and(|handler| handler.as_any().is::<H>())
            })
            .ok_or_else(Self::not_found)
    }

    /// 按 Handler 引用检索上下文。
    pub fn context_of(&self, handler: &Arc<dyn Handler>) -> crate::Result<Arc<HandlerContext>> {
        self.find_by_handler(handler).ok_or_else(Self::not_found)
    }

    /// 正向次序的用户 Handler 名称快照。
    pub fn handler_names(&self) -> Vec<String> {
        self.user_contexts()
            .into_iter()
            .map(|ctx| ctx.name().to_string())
            .collect()
    }

    fn user_contexts(&self) -> Vec<Arc<HandlerContext>> {
        let mut contexts = Vec::new();
        let mut cursor = self.head.next_context();
        while let Some(ctx) = cursor {
            if Arc::ptr_eq(&ctx, &self.tail) {
                break;
            }
            cursor = ctx.next_context();
            contexts.push(ctx);
        }
        contexts
    }

    fn find_by_name(&self, name: &str) -> Option<Arc<HandlerContext>> {
        self.user_contexts()
            .into_iter()
            .find(|ctx| ctx.name() == name)
    }

    fn find_by_handler(&self, handler: &Arc<dyn Handler>) -> Option<Arc<HandlerContext>> {
        self.user_contexts().into_iter().find(|ctx| {
            ctx.handler()
                .is_some_and(|candidate| Arc::ptr_eq(&candidate, handler))
        })
    }

    // ---- 入站入口：传输层事件自头哨兵进入链路 ----

    /// 广播"通道已注册"。
    pub fn emit_channel_registered(&self) {
        self.run_on_loop(|pipeline| pipeline.head.forward_channel_registered());
    }

    /// 广播"通道活跃"。
    pub fn emit_channel_active(&self) {
        self.run_on_loop(|pipeline| pipeline.head.forward_channel_active());
    }

    /// 广播"通道去激活"。
    pub fn emit_channel_inactive(&self) {
        self.run_on_loop(|pipeline| pipeline.head.forward_channel_inactive());
    }

    /// 向入站链路广播读取到的消息。
    pub fn emit_read(&self, msg: PipelineMessage) {
        self.run_on_loop(move |pipeline| pipeline.head.forward_read(msg));
    }

    /// 宣告一轮读取已完成。
    pub fn emit_read_completed(&self) {
        self.run_on_loop(|pipeline| pipeline.head.forward_read_completed());
    }

    /// 通知可写性发生变化。
    pub fn emit_writability_changed(&self) {
        self.run_on_loop(|pipeline| pipeline.head.forward_writability_changed());
    }

    /// 广播入站用户事件。
    pub fn emit_user_event(&self, event: UserEvent) {
        self.run_on_loop(move |pipeline| pipeline.head.forward_user_event(event));
    }

    /// 广播异常，允许 Handler 做容错处理。
    pub fn emit_exception(&self, error: CoreError) {
        self.run_on_loop(move |pipeline| pipeline.head.forward_exception(error));
    }

    // ---- 出站入口：通道侧操作自尾哨兵向前走 ----

    /// 写入一条消息。
    pub fn write(&self, msg: PipelineMessage) -> DeferredResult<()> {
        self.submit(move |pipeline, promise| pipeline.tail.write(msg, Some(promise)))
    }

    /// 冲刷写缓冲。
    pub fn flush(&self) {
        self.run_on_loop(|pipeline| pipeline.tail.flush());
    }

    /// 写入并立即冲刷。
    pub fn write_and_flush(&self, msg: PipelineMessage) -> DeferredResult<()> {
        self.submit(move |pipeline, promise| pipeline.tail.write_and_flush(msg, Some(promise)))
    }

    /// 注册传输。
    pub fn register(&self) -> DeferredResult<()> {
        self.submit(|pipeline, promise| pipeline.tail.register(Some(promise)))
    }

    /// 绑定本地地址。
    pub fn bind(&self, addr: TransportSocketAddr) -> DeferredResult<()> {
        self.submit(move |pipeline, promise| pipeline.tail.bind(addr, Some(promise)))
    }

    /// 连接远端地址。
    pub fn connect(&self, addr: TransportSocketAddr) -> DeferredResult<()> {
        self.submit(move |pipeline, promise| pipeline.tail.connect(addr, Some(promise)))
    }

    /// 请求继续读取。
    pub fn read_request(&self) {
        self.run_on_loop(|pipeline| pipeline.tail.read_request());
    }

    /// 发起关闭。
    pub fn close(&self) -> DeferredResult<()> {
        self.submit(|pipeline, promise| pipeline.tail.close(Some(promise)))
    }

    /// 发起出站用户事件。
    pub fn trigger_user_event(&self, event: UserEvent) -> DeferredResult<()> {
        self.submit(move |pipeline, promise| {
            pipeline.tail.trigger_user_event(event, Some(promise))
        })
    }

    // ---- 通道收尾 ----

    /// 通道收尾：逐个终结用户节点，恰好一次地执行 `on_removed`。
    ///
    /// # 契约说明（What）
    /// - 由通道实现于关闭流程中调用（嵌入式驱动在 `finish`/`close` 路径触发）；
    /// - 对握手未兑现的节点强制摘除并兑现其移除承诺，令牌就此失效；
    /// - 幂等：重复调用为 no-op。
    pub fn teardown(&self) {
        self.run_on_loop(|pipeline| pipeline.teardown0());
    }

    fn teardown0(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let first = match self.head.next_context() {
                Some(ctx) if !Arc::ptr_eq(&ctx, &self.tail) => ctx,
                _ => break,
            };
            let promise = first.take_removal().and_then(|pending| pending.promise);
            self.log_mutation("pipeline handler removed at teardown", first.name());
            first.complete_removal(promise);
        }
        self.logger.debug("pipeline teardown complete", &[]);
    }

    fn log_mutation(&self, message: &str, handler_name: &str) {
        let channel_id = self
            .channel
            .upgrade()
            .map(|channel| channel.id().to_string())
            .unwrap_or_default();
        self.logger.debug(
            message,
            &[
                KeyValue::new("pipeline.channel", channel_id),
                KeyValue::new("pipeline.handler", handler_name.to_string()),
            ],
        );
    }
}

impl core::fmt::Debug for ChannelPipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelPipeline")
            .field("handlers", &self.handler_names())
            .finish()
    }
}

/// 以 `Any` 约束从伞形合约中借出具体类型视图，供检索结果就地下转。
///
/// # 契约说明（What）
/// - 仅是 `Handler::as_any` 的便捷包装；类型不符返回 `None`。
pub fn handler_downcast<H: Handler + Any>(handler: &Arc<dyn Handler>) -> Option<&H> {
    handler.as_any().downcast_ref::<H>()
}
