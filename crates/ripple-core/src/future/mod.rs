//! 异步完成原语：单赋值的延迟结果。
//!
//! # 设计背景（Why）
//! - 流水线的结构变更与出站操作都是异步完成的：调用方立即拿到一个可观察的凭据，
//!   真正的结果在属主事件循环上兑现。
//! - 这是框架中唯一允许跨线程触碰的对象，内部以自旋锁保护单赋值单元。
//!
//! # 模块说明（What）
//! - [`Promise`]：写入半边，单次 `succeed`/`fail`；
//! - [`DeferredResult`]：读取半边，注册续体、组合变换、阻塞等待。

mod deferred;

pub use deferred::{DeferredResult, Promise};
