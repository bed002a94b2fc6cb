//! 事件循环抽象：线程亲和性判定与任务提交契约。
//!
//! # 设计背景（Why）
//! - 每条流水线由恰好一个事件循环独占：所有结构变更、事件分发、生命周期回调与
//!   延迟结果兑现都必须发生在该循环线程上。框架据此免除链路内部的数据竞争。
//! - 核心只依赖三个能力：`in_loop` 亲和性判定、`execute` 即时任务提交、
//!   `schedule` 延时任务提交；真实 selector/poller 循环由宿主实现。
//!
//! # 契约说明（What）
//! - `execute` 入队的任务必须按 FIFO 顺序执行；
//! - `in_loop` 为 `true` 时，调用方可以同步地直接修改循环所属的状态；
//! - 实现必须保证 `Send + Sync`，任务闭包跨线程投递。

use alloc::boxed::Box;
use core::time::Duration;

#[cfg(feature = "std")]
mod embedded;

#[cfg(feature = "std")]
pub use embedded::EmbeddedEventLoop;

/// 投递给事件循环的任务闭包。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 事件循环的对象安全契约。
///
/// # 设计背景（Why）
/// - 对齐事件驱动框架的惯例：循环既是执行器又是亲和性 oracle；
///   流水线通过它把离线程调用折返回属主线程。
///
/// # 契约说明（What）
/// - **前置条件**：实现必须绑定唯一属主线程（或等价的串行执行域）；
/// - **后置条件**：`execute` 提交的任务之间保持提交顺序；`schedule` 的任务
///   在虚拟或真实时间到期后进入同一串行域执行。
///
/// # 风险提示（Trade-offs）
/// - 契约不提供任务取消；上层若需要取消语义，应在任务体内自检状态位。
pub trait EventLoop: Send + Sync + 'static {
    /// 判断当前调用线程是否为循环属主线程。
    fn in_loop(&self) -> bool;

    /// 将任务追加到循环队列尾部。
    fn execute(&self, task: Task);

    /// 在延迟 `delay` 后执行任务。
    fn schedule(&self, delay: Duration, task: Task);
}

/// 单调时间点，嵌入式循环以虚拟偏移表示。
///
/// # 契约说明（What）
/// - 仅支持与 `Duration` 偏移互转，不承诺与墙钟时间的任何关系；
/// - 比较运算遵循偏移量的全序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTimePoint(Duration);

impl MonotonicTimePoint {
    /// 以偏移量构造时间点。
    pub fn from_offset(offset: Duration) -> Self {
        Self(offset)
    }

    /// 返回相对原点的偏移量。
    pub fn offset(&self) -> Duration {
        self.0
    }

    /// 饱和加法，溢出时停在 `Duration::MAX`。
    pub fn saturating_add(&self, delta: Duration) -> Self {
        Self(self.0.checked_add(delta).unwrap_or(Duration::MAX))
    }
}
