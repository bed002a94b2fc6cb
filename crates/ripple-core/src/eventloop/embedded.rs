//! 嵌入式事件循环：测试场景的确定性驱动器。
//!
//! # 设计背景（Why）
//! - 流水线语义的可观测验证需要一个可以被测试代码单步推进的循环：任务不自动运行，
//!   由 `run` 显式排空；时间不自动流逝，由 `advance_time` 显式推进。
//! - 单线程绑定：循环在构造线程上即视为"在环内"，使测试中的结构变更走同步路径，
//!   跨线程投递则走队列路径，两条路径都可覆盖。
//!
//! # 逻辑解析（How）
//! - 就绪队列为 FIFO；`run` 循环弹出并执行，执行期间新入队的任务同轮排空；
//! - 延时任务带 (到期点, 序号) 双键排序，`advance_time` 推进虚拟时钟后把到期任务
//!   按序搬入就绪队列再排空。
//!
//! # 契约说明（What）
//! - **前置条件**：`run`/`advance_time` 只能在构造线程调用（程序员错误即 panic）；
//! - **后置条件**：`run` 返回时就绪队列为空。

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::thread::{self, ThreadId};

use spin::Mutex;

use super::{EventLoop, MonotonicTimePoint, Task};

struct ScheduledTask {
    deadline: MonotonicTimePoint,
    sequence: u64,
    task: Task,
}

/// 可单步推进的嵌入式事件循环。
pub struct EmbeddedEventLoop {
    home: ThreadId,
    ready: Mutex<VecDeque<Task>>,
    scheduled: Mutex<Vec<ScheduledTask>>,
    now: Mutex<Duration>,
    sequence: AtomicU64,
}

impl EmbeddedEventLoop {
    /// 构造绑定到当前线程的循环。
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            home: thread::current().id(),
            ready: Mutex::new(VecDeque::new()),
            scheduled: Mutex::new(Vec::new()),
            now: Mutex::new(Duration::ZERO),
            sequence: AtomicU64::new(0),
        })
    }

    /// 返回当前虚拟时间点。
    pub fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint::from_offset(*self.now.lock())
    }

    /// 同步排空所有就绪任务。
    ///
    /// 执行期间入队的任务在同一轮内继续执行，直到队列真正为空。
    pub fn run(&self) {
        self.assert_home("run");
        loop {
            let task = self.ready.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// 推进虚拟时钟并执行所有到期的延时任务。
    pub fn advance_time(&self, delta: Duration) {
        self.assert_home("advance_time");
        let now = {
            let mut guard = self.now.lock();
            *guard = guard.checked_add(delta).unwrap_or(Duration::MAX);
            MonotonicTimePoint::from_offset(*guard)
        };
        let due = {
            let mut scheduled = self.scheduled.lock();
            let mut due: Vec<ScheduledTask> = Vec::new();
            let mut index = 0;
            while index < scheduled.len() {
                if scheduled[index].deadline <= now {
                    due.push(scheduled.remove(index));
                } else {
                    index += 1;
                }
            }
            due.sort_by_key(|entry| (entry.deadline, entry.sequence));
            due
        };
        {
            let mut ready = self.ready.lock();
            for entry in due {
                ready.push_back(entry.task);
            }
        }
        self.run();
    }

    fn assert_home(&self, operation: &str) {
        assert!(
            thread::current().id() == self.home,
            "EmbeddedEventLoop::{operation} 只能在构造线程调用"
        );
    }
}

impl EventLoop for EmbeddedEventLoop {
    fn in_loop(&self) -> bool {
        thread::current().id() == self.home
    }

    fn execute(&self, task: Task) {
        self.ready.lock().push_back(task);
    }

    fn schedule(&self, delay: Duration, task: Task) {
        let deadline = self.now().saturating_add(delay);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.scheduled.lock().push(ScheduledTask {
            deadline,
            sequence,
            task,
        });
    }
}
