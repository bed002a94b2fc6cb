use alloc::borrow::Cow;
use alloc::sync::Arc;
use core::fmt;

use crate::sealed::Sealed;

/// `ripple-core` 中所有错误必须实现的 `no_std` 基础 Trait。
///
/// # 设计背景（Why）
/// - `std::error::Error` 在 `no_std` 环境中不可用，因此需要一个对象安全、与平台无关的
///   错误抽象来串联底层错误链。
/// - 该 Trait 作为所有错误类型的最小公共接口，帮助框架在 `alloc` 场景下完成跨模块错误传递。
///
/// # 逻辑解析（How）
/// - 约束实现者提供 `Debug` 与 `Display`，便于日志与可观测性收集。
/// - 通过 `source` 方法递归返回链路上的上游错误，保持与 `std::error::Error::source`
///   一致的语义。
///
/// # 契约说明（What）
/// - **前置条件**：实现类型必须是 `'static` 生命周期，以便包装进 [`ErrorCause`]。
/// - **后置条件**：`source` 返回的引用生命周期受限于 `self`，以防悬垂引用。
pub trait Error: fmt::Debug + fmt::Display + Sealed {
    /// 返回当前错误的上游来源。
    fn source(&self) -> Option<&(dyn Error + 'static)>;
}

impl<E> Error for Arc<E>
where
    E: Error + ?Sized,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        (**self).source()
    }
}

/// `ErrorCause` 封装底层原因。
///
/// # 契约说明（What）
/// - 采用 `Arc` 而非 `Box`：[`CoreError`] 需要支持 `Clone`，以便同一失败被延迟结果的
///   任意多个回调观察；引用计数共享是满足该约束的最低成本方案。
pub type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// 统一的 `Result` 别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// `CoreError` 表示 `ripple-core` 跨层共享的稳定错误域。
///
/// # 设计背景（Why）
/// - 流水线、通道与传输层在不同层次产生的故障需要合流为统一的错误码，以便日志与
///   测试断言能够进行机器可读的根因识别。
/// - 框架需兼容 `no_std + alloc` 场景，因此不依赖 `std::error::Error`。
///
/// # 逻辑解析（How）
/// - 结构体以 Builder 风格方法叠加上下文（底层原因），并通过 `source()` 暴露错误链。
/// - 错误码 `code` 始终为 `'static` 字符串，承载稳定语义；`message` 面向排障人员。
///
/// # 契约说明（What）
/// - **前置条件**：调用方必须使用 [`codes`] 模块或遵循 `<域>.<语义>` 约定的自定义码值。
/// - **后置条件**：返回的实例可安全跨线程移动与克隆（`Send + Sync + Clone`）。
///
/// # 设计取舍与风险（Trade-offs）
/// - 采用 `Cow` 保存消息，静态文案零分配、动态文案一次分配。
/// - 不可恢复的程序员错误（不变量破坏、令牌错配、重复兑现）不会以 `CoreError` 表达，
///   而是直接 panic，确保测试与进程在第一现场失败。
#[derive(Clone, Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 使用稳定错误码与消息构造核心错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取人类可读的错误描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 附带一个底层原因，形成错误链。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// 判断错误码是否与给定常量一致，便于测试与分支处理。
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}

/// 框架内置的稳定错误码表。
///
/// # 设计背景（Why）
/// - 错误码一旦对外发布即冻结语义，测试与上层治理逻辑均以码值为准绳；
///   集中声明可以防止散落字符串导致的拼写漂移。
///
/// # 契约说明（What）
/// - 命名遵循 `<域>.<语义>`；新增码值只增不改。
pub mod codes {
    /// 通道已关闭后继续发起 I/O 或结构变更。
    pub const CHANNEL_IO_ON_CLOSED: &str = "channel.io_on_closed";
    /// 对已经完成关闭流程的通道重复执行关闭/终结。
    pub const CHANNEL_ALREADY_CLOSED: &str = "channel.already_closed";
    /// 查找或锚定的 Handler/上下文不在流水线中。
    pub const PIPELINE_HANDLER_NOT_FOUND: &str = "pipeline.handler_not_found";
    /// 显式命名与现存（或保留）名称冲突。
    pub const PIPELINE_DUPLICATE_NAME: &str = "pipeline.duplicate_name";
    /// 对未声明可移除能力的 Handler 发起用户态移除。
    pub const PIPELINE_UNREMOVABLE_HANDLER: &str = "pipeline.unremovable_handler";
    /// 消息信封中的运行时类型与 Handler 声明类型不符。
    pub const PROTOCOL_TYPE_MISMATCH: &str = "protocol.type_mismatch";
    /// 协议帧解析失败。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    /// 传输层一般性 I/O 失败。
    pub const TRANSPORT_IO: &str = "transport.io";
}
