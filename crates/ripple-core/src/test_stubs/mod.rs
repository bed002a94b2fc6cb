//! 测试桩命名空间，集中暴露框架官方维护的 `Noop`/`Recording` 实现，
//! 供集成测试与示例复用。
//!
//! # 设计背景（Why）
//! - 统一维护常见桩对象，避免在各测试文件重复定义零尺寸结构体；
//! - 当核心契约演进时，通过单点更新保证所有测试同步适配。
//!
//! # 使用方式（How）
//! - 通过 `use ripple_core::test_stubs::observability::*;` 引入需要的桩类型；
//! - 所有桩在 `no_std + alloc` 环境同样可用。

pub mod observability {
    //! 日志契约的 `Noop` 与记录型实现。

    use alloc::string::String;
    use alloc::vec::Vec;

    use spin::Mutex;

    use crate::observability::{LogRecord, Logger};

    /// 丢弃一切输出的日志器。
    #[derive(Clone, Copy, Debug, Default)]
    pub struct NoopLogger;

    impl Logger for NoopLogger {
        fn log(&self, _record: &LogRecord<'_>) {}
    }

    /// 记录消息文本的日志器，用于断言日志路径被触达。
    ///
    /// # 契约说明（What）
    /// - 仅保留消息文本与级别标签，不保留结构化字段；
    ///   需要验证字段的测试应实现专用 Logger。
    #[derive(Debug, Default)]
    pub struct RecordingLogger {
        entries: Mutex<Vec<String>>,
    }

    impl RecordingLogger {
        /// 构造空记录器。
        pub fn new() -> Self {
            Self::default()
        }

        /// 取出当前全部记录。
        pub fn entries(&self) -> Vec<String> {
            self.entries.lock().clone()
        }
    }

    impl Logger for RecordingLogger {
        fn log(&self, record: &LogRecord<'_>) {
            self.entries
                .lock()
                .push(alloc::format!("{:?}:{}", record.severity, record.message));
        }
    }
}
