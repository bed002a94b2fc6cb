//! 通道流水线：有序、双向、可热变更的 Handler 链。
//!
//! # 设计背景（Why）
//! - 框架的一切都流经这里：每个从 socket 读到的字节、每次写请求、每个生命周期
//!   信号都沿着这条链传播。难点在于：链路要在事件在途时支持结构变更、维持严格的
//!   线程亲和与重入纪律、并在所有失败交织下保证生命周期回调至多一次。
//!
//! # 模块说明（What）
//! - [`handler`]：入站/出站/生命周期合约与能力声明；
//! - [`context`]：链表节点与每节点分发面；
//! - `pipeline`：链表本体、变更 API、检索与通道收尾；
//! - `sentinel`：头/尾哨兵的终态实现。
//!
//! # 命名约定（Consistency）
//! - 入站以 `forward_*`（节点视角）与 `emit_*`（链路入口）命名；
//! - 出站直接以动词命名（`write`/`flush`/`connect`…），与通道侧语义一致。

pub mod context;
pub mod handler;
mod pipeline;
mod sentinel;

pub use context::{HandlerContext, RemovalToken};
pub use handler::{Handler, HandlerDescriptor, InboundHandler, OutboundHandler, UserEvent};
pub use pipeline::{
    ChainEnd, ChannelPipeline, HandlerPosition, PipelineAnchor, handler_downcast,
};
