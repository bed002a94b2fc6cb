//! 可观测性契约：结构化日志的最小稳定面。
//!
//! # 设计背景（Why）
//! - 流水线在结构变更与末端兜底（尾哨兵吞掉未处理错误）时必须留下机读痕迹，
//!   否则热插拔类故障无法事后归因。
//! - 框架不绑定具体日志后端：宿主可以对接 `tracing`、syslog 或自研采集器，
//!   核心只约定对象安全的 [`Logger`] 契约。
//!
//! # 逻辑解析（How）
//! - [`LogRecord`] 借鉴 OpenTelemetry Log Data Model，将消息、级别与结构化字段打包；
//! - [`Logger`] 仅要求实现 `log`，便捷方法内部统一构造记录后委托给 `log`，
//!   确保所有路径共享相同逻辑。
//!
//! # 契约说明（What）
//! - 字段键值需遵循低基数原则；`Logger` 实现应尽量非阻塞。

use alloc::borrow::Cow;

use crate::error::Error;

/// 日志级别枚举，取 OpenTelemetry `SeverityNumber` 与通用日志门面的交集。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 结构化日志字段的键值对。
///
/// # 契约说明（What）
/// - `key` 建议使用 `pipeline.handler` 形式的点分命名；
/// - `value` 采用 `Cow`，静态标签零分配，动态取值一次分配。
#[derive(Clone, Debug)]
pub struct KeyValue<'a> {
    pub key: &'a str,
    pub value: Cow<'a, str>,
}

impl<'a> KeyValue<'a> {
    /// 构造新的键值对。
    pub fn new(key: &'a str, value: impl Into<Cow<'a, str>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// 结构化日志字段集合。
pub type LogField<'a> = &'a [KeyValue<'a>];

/// 单条结构化日志记录。
///
/// # 契约说明（What）
/// - **前置条件**：`attributes` 必须在 [`Logger::log`] 返回前保持有效；
/// - **后置条件**：记录提交后视为不可变快照。
#[derive(Debug)]
pub struct LogRecord<'a> {
    pub message: Cow<'a, str>,
    pub severity: LogSeverity,
    pub target: Option<Cow<'a, str>>,
    pub error: Option<&'a dyn Error>,
    pub attributes: LogField<'a>,
}

impl<'a> LogRecord<'a> {
    /// 构建新的日志记录。
    pub fn new(
        message: impl Into<Cow<'a, str>>,
        severity: LogSeverity,
        target: Option<impl Into<Cow<'a, str>>>,
        error: Option<&'a dyn Error>,
        attributes: LogField<'a>,
    ) -> Self {
        Self {
            message: message.into(),
            severity,
            target: target.map(Into::into),
            error,
            attributes,
        }
    }
}

/// 日志接口的核心契约。
///
/// # 设计背景（Why）
/// - 统一框架对宿主日志实现的依赖；核心代码永不直接写标准输出。
///
/// # 逻辑解析（How）
/// - `log` 为唯一必需方法；`debug`/`info`/`warn`/`error` 便捷方法内部构造
///   [`LogRecord`] 再调用 `log`。
///
/// # 风险提示（Trade-offs）
/// - 高吞吐场景应避免在字段中携带请求级标识，防止日志基数爆炸。
pub trait Logger: Send + Sync + 'static {
    /// 提交结构化日志。
    fn log(&self, record: &LogRecord<'_>);

    /// 输出 DEBUG 日志。
    fn debug(&self, message: &str, attributes: LogField<'_>) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Debug,
            None::<Cow<'_, str>>,
            None,
            attributes,
        ));
    }

    /// 输出 INFO 日志。
    fn info(&self, message: &str, attributes: LogField<'_>) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Info,
            None::<Cow<'_, str>>,
            None,
            attributes,
        ));
    }

    /// 输出 WARN 日志。
    fn warn(&self, message: &str, error: Option<&dyn Error>, attributes: LogField<'_>) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Warn,
            None::<Cow<'_, str>>,
            error,
            attributes,
        ));
    }

    /// 输出 ERROR 日志。
    fn error(&self, message: &str, error: Option<&dyn Error>, attributes: LogField<'_>) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Error,
            None::<Cow<'_, str>>,
            error,
            attributes,
        ));
    }
}
