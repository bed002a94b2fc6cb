//! 嵌入式通道：纯内存的通道 + 传输组合，使流水线语义可被同步观测。
//!
//! # 设计背景（Why）
//! - 流水线的契约（走查次序、生命周期配对、握手终结）必须能在不起真实 I/O 的
//!   前提下逐步验证；嵌入式驱动以内存队列满足传输能力面，以单步循环驱动任务。
//!
//! # 逻辑解析（How）
//! - 入站注入：`write_inbound` 把消息自头哨兵广播进链路，未被消费的消息落入
//!   通道的入站回收队列，`read_inbound` 取走；
//! - 出站注入：`write_outbound` 自尾哨兵发起写冲刷，抵达头哨兵的消息进入传输
//!   的出站队列，`read_outbound` 取走；
//! - 收尾：`finish` 触发关闭流水（去激活广播 → 流水线收尾 → 状态 `Closed`），
//!   重复调用以 `channel.already_closed` 失败。
//!
//! # 契约说明（What）
//! - 驱动方法都应在构造线程（即属主循环线程）调用；
//! - 每个驱动方法返回前都会排空循环队列，测试代码观察到的是稳定状态。

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::buffer::{BufferAllocator, HeapBufferAllocator, PipelineMessage};
use crate::channel::{Channel, ChannelState};
use crate::error::{CoreError, codes};
use crate::eventloop::{EmbeddedEventLoop, EventLoop};
use crate::future::{DeferredResult, Promise};
use crate::observability::Logger;
use crate::pipeline::ChannelPipeline;
use crate::test_stubs::observability::NoopLogger;
use crate::transport::{Transport, TransportSocketAddr};

fn settle_ok(promise: Option<Promise<()>>) {
    if let Some(promise) = promise {
        promise.succeed(());
    }
}

/// 内存传输：以队列满足头哨兵消费的能力面。
///
/// # 契约说明（What）
/// - `write` 进入待写区，`flush` 才搬入出站队列——写而不冲刷的消息对
///   `read_outbound` 不可见；
/// - `close` 驱动所属通道的收尾流程。
#[derive(Default)]
pub struct EmbeddedTransport {
    channel: Mutex<Weak<EmbeddedChannel>>,
    pending: Mutex<Vec<PipelineMessage>>,
    flushed: Mutex<VecDeque<PipelineMessage>>,
    local: Mutex<Option<TransportSocketAddr>>,
    remote: Mutex<Option<TransportSocketAddr>>,
    closed: AtomicBool,
    read_requests: AtomicU64,
}

impl EmbeddedTransport {
    fn attach(&self, channel: &Arc<EmbeddedChannel>) {
        *self.channel.lock() = Arc::downgrade(channel);
    }

    fn pop_flushed(&self) -> Option<PipelineMessage> {
        self.flushed.lock().pop_front()
    }

    fn has_buffered_output(&self) -> bool {
        !self.pending.lock().is_empty() || !self.flushed.lock().is_empty()
    }

    /// 链路经头哨兵请求继续读取的累计次数。
    pub fn read_request_count(&self) -> u64 {
        self.read_requests.load(Ordering::Relaxed)
    }
}

impl Transport for EmbeddedTransport {
    fn register(&self, promise: Option<Promise<()>>) {
        settle_ok(promise);
    }

    fn bind(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>) {
        *self.local.lock() = Some(addr);
        settle_ok(promise);
    }

    fn connect(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>) {
        if self.closed.load(Ordering::SeqCst) {
            if let Some(promise) = promise {
                promise.fail(CoreError::new(
                    codes::CHANNEL_IO_ON_CLOSED,
                    "connect on a closed transport",
                ));
            }
            return;
        }
        *self.remote.lock() = Some(addr);
        settle_ok(promise);
    }

    fn write(&self, msg: PipelineMessage) -> crate::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::new(
                codes::CHANNEL_IO_ON_CLOSED,
                "write on a closed transport",
            ));
        }
        self.pending.lock().push(msg);
        Ok(())
    }

    fn flush(&self) {
        let mut pending = self.pending.lock();
        let mut flushed = self.flushed.lock();
        for msg in pending.drain(..) {
            flushed.push_back(msg);
        }
    }

    fn read_request(&self) {
        self.read_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn close(&self, promise: Option<Promise<()>>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            if let Some(promise) = promise {
                promise.fail(CoreError::new(
                    codes::CHANNEL_ALREADY_CLOSED,
                    "transport already closed",
                ));
            }
            return;
        }
        match self.channel.lock().upgrade() {
            Some(channel) => channel.complete_close(promise),
            None => settle_ok(promise),
        }
    }

    fn local_address(&self) -> Option<TransportSocketAddr> {
        self.local.lock().clone()
    }

    fn remote_address(&self) -> Option<TransportSocketAddr> {
        self.remote.lock().clone()
    }
}

/// 嵌入式通道：测试场景的可观测驱动器。
pub struct EmbeddedChannel {
    id: String,
    event_loop: Arc<EmbeddedEventLoop>,
    pipeline: Arc<ChannelPipeline>,
    transport: Arc<EmbeddedTransport>,
    allocator: Arc<HeapBufferAllocator>,
    state: Mutex<ChannelState>,
    inbound: Mutex<VecDeque<PipelineMessage>>,
    last_error: Mutex<Option<CoreError>>,
    finished: AtomicBool,
}

impl EmbeddedChannel {
    /// 构造并立即注册、激活通道（对应的入站事件已广播完毕）。
    pub fn new() -> Arc<Self> {
        Self::with_logger(Arc::new(NoopLogger))
    }

    /// 指定日志器的构造变体。
    pub fn with_logger(logger: Arc<dyn Logger>) -> Arc<Self> {
        let event_loop = EmbeddedEventLoop::new();
        let transport = Arc::new(EmbeddedTransport::default());
        let channel = Arc::new_cyclic(|weak: &Weak<EmbeddedChannel>| {
            let pipeline = ChannelPipeline::new(
                weak.clone(),
                Arc::clone(&event_loop) as Arc<dyn EventLoop>,
                logger,
            );
            Self {
                id: String::from("embedded"),
                event_loop,
                pipeline,
                transport: Arc::clone(&transport),
                allocator: Arc::new(HeapBufferAllocator),
                state: Mutex::new(ChannelState::Unregistered),
                inbound: Mutex::new(VecDeque::new()),
                last_error: Mutex::new(None),
                finished: AtomicBool::new(false),
            }
        });
        transport.attach(&channel);
        *channel.state.lock() = ChannelState::Registered;
        channel.pipeline.emit_channel_registered();
        *channel.state.lock() = ChannelState::Active;
        channel.pipeline.emit_channel_active();
        channel.event_loop.run();
        channel
    }

    /// 通道的流水线。
    pub fn pipeline(&self) -> &Arc<ChannelPipeline> {
        &self.pipeline
    }

    /// 通道的嵌入式循环（具体类型，便于 `run`/`advance_time`）。
    pub fn embedded_loop(&self) -> &Arc<EmbeddedEventLoop> {
        &self.event_loop
    }

    /// 通道的嵌入式传输（具体类型，便于观测读请求等）。
    pub fn embedded_transport(&self) -> &Arc<EmbeddedTransport> {
        &self.transport
    }

    /// 自头哨兵注入一条入站消息，返回是否有消息抵达尾哨兵。
    ///
    /// # 契约说明（What）
    /// - 注入后自动补发一次"读取完成"并排空循环；
    /// - 若链路把错误漏到了尾哨兵，本调用直接以该错误失败。
    pub fn write_inbound(&self, msg: PipelineMessage) -> crate::Result<bool> {
        self.ensure_open()?;
        self.pipeline.emit_read(msg);
        self.pipeline.emit_read_completed();
        self.event_loop.run();
        self.throw_if_error_caught()?;
        Ok(!self.inbound.lock().is_empty())
    }

    /// 自尾哨兵发起一次写冲刷，返回是否有消息抵达头哨兵。
    pub fn write_outbound(&self, msg: PipelineMessage) -> crate::Result<bool> {
        self.ensure_open()?;
        let deferred = self.pipeline.write_and_flush(msg);
        self.event_loop.run();
        if let Some(Err(error)) = deferred.try_outcome() {
            return Err(error);
        }
        Ok(!self.transport.flushed.lock().is_empty())
    }

    /// 取走一条抵达尾哨兵的入站消息。
    pub fn read_inbound(&self) -> Option<PipelineMessage> {
        self.inbound.lock().pop_front()
    }

    /// 取走一条抵达头哨兵的出站消息。
    pub fn read_outbound(&self) -> Option<PipelineMessage> {
        self.transport.pop_flushed()
    }

    /// 通过流水线发起连接。
    pub fn connect(&self, addr: TransportSocketAddr) -> crate::Result<()> {
        self.ensure_open()?;
        let deferred = self.pipeline.connect(addr);
        self.event_loop.run();
        Self::settle(deferred)
    }

    /// 通过流水线发起绑定。
    pub fn bind(&self, addr: TransportSocketAddr) -> crate::Result<()> {
        self.ensure_open()?;
        let deferred = self.pipeline.bind(addr);
        self.event_loop.run();
        Self::settle(deferred)
    }

    /// 通过流水线发起关闭，返回关闭的延迟结果。
    pub fn close(&self) -> DeferredResult<()> {
        let deferred = self.pipeline.close();
        self.event_loop.run();
        deferred
    }

    /// 终结通道：关闭、收尾并报告是否仍有滞留数据。
    ///
    /// # 契约说明（What）
    /// - 返回 `true` 当且仅当终结时入站/出站缓冲非空；
    /// - 重复终结以 `channel.already_closed` 失败；
    /// - 若链路在收尾期间漏出了错误，本调用以该错误失败。
    pub fn finish(&self) -> crate::Result<bool> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(CoreError::new(
                codes::CHANNEL_ALREADY_CLOSED,
                "embedded channel already finished",
            ));
        }
        let deferred = self.pipeline.close();
        self.event_loop.run();
        if let Some(Err(error)) = deferred.try_outcome()
            && !error.is(codes::CHANNEL_ALREADY_CLOSED)
        {
            return Err(error);
        }
        self.throw_if_error_caught()?;
        Ok(!self.inbound.lock().is_empty() || self.transport.has_buffered_output())
    }

    /// 取出并抛出链路漏到尾哨兵的最近错误。
    pub fn throw_if_error_caught(&self) -> crate::Result<()> {
        match self.last_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// 传输层本地地址。
    pub fn local_address(&self) -> Option<TransportSocketAddr> {
        self.transport.local_address()
    }

    /// 传输层远端地址。
    pub fn remote_address(&self) -> Option<TransportSocketAddr> {
        self.transport.remote_address()
    }

    pub(crate) fn complete_close(&self, promise: Option<Promise<()>>) {
        {
            let mut state = self.state.lock();
            if *state == ChannelState::Closed {
                if let Some(promise) = promise {
                    promise.fail(CoreError::new(
                        codes::CHANNEL_ALREADY_CLOSED,
                        "channel already closed",
                    ));
                }
                return;
            }
            *state = ChannelState::Inactive;
        }
        // 去激活事件先于收尾广播：Handler 在 `on_removed` 之前能看到完整的
        // 通道生命周期。
        self.pipeline.emit_channel_inactive();
        *self.state.lock() = ChannelState::Closed;
        self.pipeline.teardown();
        settle_ok(promise);
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.finished.load(Ordering::SeqCst) || *self.state.lock() == ChannelState::Closed {
            return Err(CoreError::new(
                codes::CHANNEL_IO_ON_CLOSED,
                "embedded channel is closed",
            ));
        }
        Ok(())
    }

    fn settle(deferred: DeferredResult<()>) -> crate::Result<()> {
        match deferred.try_outcome() {
            Some(result) => result,
            // 操作被某个 Handler 挂起（合法的"停住"语义），按已受理处理。
            None => Ok(()),
        }
    }
}

impl Channel for EmbeddedChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn event_loop(&self) -> Arc<dyn EventLoop> {
        Arc::clone(&self.event_loop) as Arc<dyn EventLoop>
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport) as Arc<dyn Transport>
    }

    fn allocator(&self) -> Arc<dyn BufferAllocator> {
        Arc::clone(&self.allocator) as Arc<dyn BufferAllocator>
    }

    fn on_unhandled_read(&self, msg: PipelineMessage) {
        self.inbound.lock().push_back(msg);
    }

    fn on_error_caught(&self, error: CoreError) {
        *self.last_error.lock() = Some(error);
    }
}
