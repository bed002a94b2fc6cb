//! 传输层契约：头哨兵与外部 I/O 实现之间的能力面。
//!
//! # 设计背景（Why）
//! - 流水线对真实 I/O 不做任何假设：socket、QUIC 流或纯内存队列都可以充当传输层，
//!   只要满足本模块的能力集合。出站链路走到头哨兵后翻译为这里的调用。
//!
//! # 契约说明（What）
//! - 所有生命周期操作通过可选的 [`Promise`] 报告完成；`write` 同步返回结果，
//!   由头哨兵决定回填承诺还是折返错误事件。

use alloc::borrow::Cow;
use core::fmt;

use crate::buffer::PipelineMessage;
use crate::future::Promise;

/// 传输层地址的轻量表示。
///
/// # 契约说明（What）
/// - 框架不解析地址内容，仅作为不透明标识传递；嵌入式驱动用它记录
///   `bind`/`connect` 的目标。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSocketAddr(Cow<'static, str>);

impl TransportSocketAddr {
    /// 以任意字符串构造地址。
    pub fn new(addr: impl Into<Cow<'static, str>>) -> Self {
        Self(addr.into())
    }

    /// 以字符串切片视角读取地址。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输层能力契约，由头哨兵消费。
///
/// # 教案式说明
/// - **意图（Why）**：把"链路终点"抽象为一组最小能力，使嵌入式驱动与真实
///   transport 在流水线视角下完全同形。
/// - **逻辑（How）**：带承诺的操作在完成（或失败）时兑现承诺；未带承诺时实现
///   自行吞掉成功、把失败留给调用方的错误事件路径。
/// - **契约（What）**：所有方法都在通道属主循环上被调用；实现不得阻塞。
pub trait Transport: Send + Sync + 'static {
    /// 注册到事件循环。
    fn register(&self, promise: Option<Promise<()>>);

    /// 绑定本地地址。
    fn bind(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>);

    /// 连接远端地址。
    fn connect(&self, addr: TransportSocketAddr, promise: Option<Promise<()>>);

    /// 追加一条待写消息。
    fn write(&self, msg: PipelineMessage) -> crate::Result<()>;

    /// 冲刷全部待写消息。
    fn flush(&self);

    /// 请求继续读取。
    fn read_request(&self);

    /// 关闭传输并驱动通道收尾。
    fn close(&self, promise: Option<Promise<()>>);

    /// 当前本地地址。
    fn local_address(&self) -> Option<TransportSocketAddr>;

    /// 当前远端地址。
    fn remote_address(&self) -> Option<TransportSocketAddr>;
}
