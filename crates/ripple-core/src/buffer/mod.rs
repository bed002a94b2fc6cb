//! 消息信封与缓冲分配契约。
//!
//! # 设计背景（Why）
//! - 流水线中的事件分发是类型擦除的：同一条链路上可能先后流过字节缓冲与业务对象，
//!   必须通过运行时类型标签屏蔽具体类型，错装链路应在解包处立即暴露。
//! - 借鉴复合消息模式：网络层字节与业务层对象共用一个信封，在编解码 Handler 处转换。
//!
//! # 逻辑解析（How）
//! - [`PipelineMessage::Buffer`] 承载 L4/L5 字节快照；[`PipelineMessage::User`]
//!   通过 `Any` 承载任意 `Send + Sync` 业务对象，支持运行时下转型。
//! - `try_into_*` 返回原信封供调用方继续转发；`expect_*` 将类型不符折叠为
//!   稳定错误码 [`codes::PROTOCOL_TYPE_MISMATCH`](crate::error::codes)。
//!
//! # 契约说明（What）
//! - **前置条件**：构造 `User` 时调用方必须保证内部类型满足线程安全语义；
//! - **后置条件**：类型不符属于链路装配期的程序员错误，调用方不应将其作为
//!   常规控制流分支。

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::{Any, type_name};
use core::fmt;

use crate::error::{CoreError, codes};

/// 轻量的字节快照容器，适用于嵌入式驱动与测试用例。
pub type Bytes = Vec<u8>;

/// `PipelineMessage` 统一承载网络层字节与业务层对象。
///
/// # 设计考量（Trade-offs & Gotchas）
/// - **对象擦除**：采用 `Any` 实现，对比泛型消息牺牲一定编译期优化，但支持动态协议装配。
/// - **调试输出**：`Debug` 实现刻意隐藏内部细节，避免在日志中泄漏敏感数据。
pub enum PipelineMessage {
    /// L4/L5 字节缓冲。
    Buffer(Bytes),
    /// L7 业务消息。
    User(Box<dyn Any + Send + Sync>),
}

impl PipelineMessage {
    /// 将业务对象装入信封。
    pub fn from_user<T: Any + Send + Sync>(value: T) -> Self {
        PipelineMessage::User(Box::new(value))
    }

    /// 将字节快照装入信封。
    pub fn from_buffer(bytes: Bytes) -> Self {
        PipelineMessage::Buffer(bytes)
    }

    /// 是否为字节缓冲变体。
    pub fn is_buffer(&self) -> bool {
        matches!(self, PipelineMessage::Buffer(_))
    }

    /// 是否为业务消息变体。
    pub fn is_user(&self) -> bool {
        matches!(self, PipelineMessage::User(_))
    }

    /// 尝试取出指定类型的业务对象；类型不符时原样退还信封。
    pub fn try_into_user<T: Any + Send + Sync>(self) -> Result<T, Self> {
        match self {
            PipelineMessage::User(value) => match value.downcast::<T>() {
                Ok(boxed) => Ok(*boxed),
                Err(value) => Err(PipelineMessage::User(value)),
            },
            other => Err(other),
        }
    }

    /// 尝试取出字节缓冲；类型不符时原样退还信封。
    pub fn try_into_buffer(self) -> Result<Bytes, Self> {
        match self {
            PipelineMessage::Buffer(bytes) => Ok(bytes),
            other => Err(other),
        }
    }

    /// 取出指定类型的业务对象，类型不符折叠为 `protocol.type_mismatch`。
    ///
    /// # 契约说明（What）
    /// - 类型不符意味着链路装配与 Handler 声明不一致，属于程序员错误；
    ///   返回 `CoreError` 是为了让调用方能够经由错误事件把现场暴露出来，
    ///   而不是静默吞掉消息。
    pub fn expect_user<T: Any + Send + Sync>(self) -> crate::Result<T> {
        self.try_into_user::<T>()
            .map_err(|msg| msg.type_mismatch(type_name::<T>()))
    }

    /// 取出字节缓冲，类型不符折叠为 `protocol.type_mismatch`。
    pub fn expect_buffer(self) -> crate::Result<Bytes> {
        self.try_into_buffer()
            .map_err(|msg| msg.type_mismatch("buffer"))
    }

    fn type_mismatch(&self, expected: &'static str) -> CoreError {
        let actual = match self {
            PipelineMessage::Buffer(_) => "buffer",
            PipelineMessage::User(_) => "user message",
        };
        CoreError::new(
            codes::PROTOCOL_TYPE_MISMATCH,
            alloc::format!("expected {expected}, found {actual}"),
        )
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMessage::Buffer(bytes) => {
                f.debug_tuple("Buffer").field(&bytes.len()).finish()
            }
            PipelineMessage::User(_) => f.debug_tuple("User").field(&"<erased-user>").finish(),
        }
    }
}

/// 缓冲分配契约，供上下文 introspection 暴露给 Handler。
///
/// # 契约说明（What）
/// - `acquire` 返回至少 `capacity` 容量的空缓冲；
/// - 实现可做池化，本 crate 仅提供堆分配的朴素实现。
pub trait BufferAllocator: Send + Sync + 'static {
    /// 租借一块可写缓冲。
    fn acquire(&self, capacity: usize) -> Bytes;
}

/// 朴素的堆分配实现，嵌入式驱动默认使用。
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapBufferAllocator;

impl BufferAllocator for HeapBufferAllocator {
    fn acquire(&self, capacity: usize) -> Bytes {
        Vec::with_capacity(capacity)
    }
}
