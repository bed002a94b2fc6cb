#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

//! `ripple-http` 是基于 `ripple-core` 公共 API 的服务器侧 HTTP/1.1 装配助手。
//!
//! # 教案式说明
//! - **意图（Why）**：演示第三方代码如何只靠流水线的公开契约（批量插入、
//!   按引用移除、用户事件）组装一个可用的协议栈，核心 crate 对 HTTP 零感知。
//! - **逻辑（How）**：[`install_http_server_stack`] 按固定顺序装入响应编码器、
//!   请求解码器与可选的流水线化辅助、错误善后、协议升级阶段；升级阶段在装配时
//!   捕获各阶段引用，命中升级后按引用拆除并拼入替换协议。
//! - **契约（What）**：解析覆盖起始行、头域与定长报文体；完整协议一致性
//!   （分块编码、表单续传等）不在目标内。

extern crate alloc;

mod codec;
mod message;
mod server;

pub use codec::{HttpRequestDecoder, HttpResponseEncoder};
pub use message::{HttpRequest, HttpResponse};
pub use server::{
    HttpPipeliningAssist, HttpServerErrorHandler, HttpServerStackConfig, HttpUpgradeCompleted,
    HttpUpgradeConfig, HttpUpgradeHandler, install_http_server_stack,
};
