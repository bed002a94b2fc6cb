//! 通道契约：单条网络连接的抽象面。
//!
//! # 设计背景（Why）
//! - 通道在其整个生命周期内拥有恰好一条流水线与一个事件循环绑定；
//!   流水线通过本契约回访通道（传输能力、分配器、末端兜底）。
//! - 为避免强引用环：通道强持流水线，流水线以弱引用回指通道。
//!
//! # 模块说明（What）
//! - [`ChannelState`]：注册/活跃/关闭的单调状态机快照；
//! - [`Channel`]：流水线与哨兵消费的能力面；
//! - [`embedded`]（`std`）：内存版通道 + 循环，测试场景的观测驱动器。

use alloc::sync::Arc;

use crate::buffer::{BufferAllocator, PipelineMessage};
use crate::error::CoreError;
use crate::eventloop::EventLoop;
use crate::transport::Transport;

#[cfg(feature = "std")]
pub mod embedded;

#[cfg(feature = "std")]
pub use embedded::EmbeddedChannel;

/// 通道状态快照。
///
/// # 契约说明（What）
/// - 状态单调推进：`Unregistered → Registered → Active → Inactive → Closed`；
/// - `Closed` 之后任何结构变更与 I/O 都以 `channel.io_on_closed` 失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// 尚未注册到事件循环。
    Unregistered,
    /// 已注册，未激活。
    Registered,
    /// 连接活跃，可收发。
    Active,
    /// 已触发去激活，收尾进行中。
    Inactive,
    /// 生命周期终结。
    Closed,
}

/// 通道能力契约，由流水线与哨兵消费。
///
/// # 教案式说明
/// - **意图（Why）**：流水线需要回访通道的四类能力——身份、状态、运行时资源
///   （循环/传输/分配器）与末端兜底钩子；其余通道行为（真实 I/O 细节）对
///   流水线不可见。
/// - **逻辑（How）**：尾哨兵把未被任何 Handler 消费的读事件与错误事件交给
///   `on_unhandled_read` / `on_error_caught`；默认实现静默丢弃，嵌入式驱动
///   覆写为可观测的记录行为。
/// - **契约（What）**：所有方法都可能在事件回调内被调用，实现不得阻塞、
///   不得重入流水线分发。
pub trait Channel: Send + Sync + 'static {
    /// 通道标识，用于日志标签。
    fn id(&self) -> &str;

    /// 当前状态快照。
    fn state(&self) -> ChannelState;

    /// 是否处于活跃态。
    fn is_active(&self) -> bool {
        matches!(self.state(), ChannelState::Active)
    }

    /// 属主事件循环。
    fn event_loop(&self) -> Arc<dyn EventLoop>;

    /// 传输层能力面。
    fn transport(&self) -> Arc<dyn Transport>;

    /// 缓冲分配器。
    fn allocator(&self) -> Arc<dyn BufferAllocator>;

    /// 到达尾哨兵仍未被消费的读事件。
    fn on_unhandled_read(&self, msg: PipelineMessage) {
        let _ = msg;
    }

    /// 到达尾哨兵仍未被消费的错误事件。
    fn on_error_caught(&self, error: CoreError) {
        let _ = error;
    }
}
