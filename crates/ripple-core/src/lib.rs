#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![doc = "ripple-core: 事件驱动网络框架的通道流水线内核。"]
#![doc = ""]
#![doc = "一条通道（一个网络连接）拥有恰好一条流水线与一个事件循环绑定；"]
#![doc = "所有入站事件、出站操作、结构变更与延迟结果兑现都被串行化到属主循环上。"]
#![doc = "本 crate 提供：流水线与 Handler 上下文、单赋值延迟结果、事件循环抽象、"]
#![doc = "类型擦除的消息信封、传输能力契约，以及用于确定性测试的嵌入式通道驱动。"]

extern crate alloc;

mod sealed;

pub mod buffer;
pub mod channel;
pub mod error;
pub mod eventloop;
pub mod future;
pub mod observability;
pub mod pipeline;
pub mod test_stubs;
pub mod transport;

pub use buffer::{BufferAllocator, Bytes, HeapBufferAllocator, PipelineMessage};
#[cfg(feature = "std")]
pub use channel::EmbeddedChannel;
pub use channel::{Channel, ChannelState};
pub use error::{CoreError, Error, ErrorCause, Result, codes};
#[cfg(feature = "std")]
pub use eventloop::EmbeddedEventLoop;
pub use eventloop::{EventLoop, MonotonicTimePoint, Task};
pub use future::{DeferredResult, Promise};
pub use observability::{KeyValue, LogField, LogRecord, LogSeverity, Logger};
pub use pipeline::{
    ChainEnd, ChannelPipeline, Handler, HandlerContext, HandlerDescriptor, HandlerPosition,
    InboundHandler, OutboundHandler, PipelineAnchor, RemovalToken, UserEvent, handler_downcast,
};
pub use transport::{Transport, TransportSocketAddr};
