use core::any::Any;

use crate::buffer::PipelineMessage;
use crate::error::{CoreError, codes};
use crate::future::Promise;
use crate::observability::KeyValue;
use crate::transport::TransportSocketAddr;

use super::context::HandlerContext;
use super::handler::{Handler, HandlerDescriptor, InboundHandler, OutboundHandler, UserEvent};

/// 头哨兵：出站链路的终点，入站事件的起点。
///
/// # 教案式说明
/// - **意图（Why）**：出站走查必须有一个总能终结操作的节点；头哨兵把出站操作
///   翻译为传输层能力调用，使流水线对真实 I/O 零假设。
/// - **逻辑（How）**：每个出站回调取出通道的 [`Transport`](crate::transport::Transport)
///   并委托；`write` 的同步失败按"有承诺回填承诺、无承诺折返错误事件"的
///   策略上报。
/// - **契约（What）**：不可移除、不可按名称/类型检索；通道失联时出站操作以
///   `channel.io_on_closed` 失败。
pub(crate) struct HeadSentinel;

impl HeadSentinel {
    fn with_transport(
        ctx: &HandlerContext,
        promise: Option<Promise<()>>,
        operation: impl FnOnce(&dyn crate::transport::Transport, Option<Promise<()>>),
    ) {
        match ctx.channel() {
            Some(channel) => operation(channel.transport().as_ref(), promise),
            None => {
                if let Some(promise) = promise {
                    promise.fail(CoreError::new(
                        codes::CHANNEL_IO_ON_CLOSED,
                        "channel is gone",
                    ));
                }
            }
        }
    }
}

impl Handler for HeadSentinel {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new("ripple.head", "sentinel", "outbound terminus")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn outbound(&self) -> Option<&dyn OutboundHandler> {
        Some(self)
    }
}

impl OutboundHandler for HeadSentinel {
    fn on_register(&self, ctx: &HandlerContext, promise: Option<Promise<()>>) {
        Self::with_transport(ctx, promise, |transport, promise| {
            transport.register(promise);
        });
    }

    fn on_bind(
        &self,
        ctx: &HandlerContext,
        addr: TransportSocketAddr,
        promise: Option<Promise<()>>,
    ) {
        Self::with_transport(ctx, promise, |transport, promise| {
            transport.bind(addr, promise);
        });
    }

    fn on_connect(
        &self,
        ctx: &HandlerContext,
        addr: TransportSocketAddr,
        promise: Option<Promise<()>>,
    ) {
        Self::with_transport(ctx, promise, |transport, promise| {
            transport.connect(addr, promise);
        });
    }

    fn on_write(&self, ctx: &HandlerContext, msg: PipelineMessage, promise: Option<Promise<()>>) {
        let Some(channel) = ctx.channel() else {
            if let Some(promise) = promise {
                promise.fail(CoreError::new(
                    codes::CHANNEL_IO_ON_CLOSED,
                    "channel is gone",
                ));
            }
            return;
        };
        match channel.transport().write(msg) {
            Ok(()) => {
                if let Some(promise) = promise {
                    promise.succeed(());
                }
            }
            Err(error) => match promise {
                Some(promise) => promise.fail(error),
                // 无承诺可回填时，失败折返为入站错误事件，自链首向后传播。
                None => ctx.forward_exception(error),
            },
        }
    }

    fn on_flush(&self, ctx: &HandlerContext) {
        if let Some(channel) = ctx.channel() {
            channel.transport().flush();
        }
    }

    fn on_read_request(&self, ctx: &HandlerContext) {
        if let Some(channel) = ctx.channel() {
            channel.transport().read_request();
        }
    }

    fn on_close(&self, ctx: &HandlerContext, promise: Option<Promise<()>>) {
        Self::with_transport(ctx, promise, |transport, promise| {
            transport.close(promise);
        });
    }

    fn on_trigger_user_event(
        &self,
        ctx: &HandlerContext,
        event: UserEvent,
        promise: Option<Promise<()>>,
    ) {
        // 传输层没有用户事件概念：头哨兵即事件的终点，吞掉并宣告成功。
        let _ = (ctx, event);
        if let Some(promise) = promise {
            promise.succeed(());
        }
    }
}

/// 尾哨兵：入站链路的终点，通道侧出站操作的起点。
///
/// # 教案式说明
/// - **意图（Why）**：入站走查必须总能终止；没有任何 Handler 消费的事件在此
///   兜底——读事件交由通道记录（嵌入式驱动会回收），错误事件存为通道的
///   最近错误并打 WARN 日志。
/// - **契约（What）**：不可移除、不可按名称/类型检索；所有入站方法均为终态
///   实现，不再向后转发。
pub(crate) struct TailSentinel;

impl Handler for TailSentinel {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new("ripple.tail", "sentinel", "inbound terminus")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for TailSentinel {
    fn on_channel_registered(&self, _ctx: &HandlerContext) {}

    fn on_channel_active(&self, _ctx: &HandlerContext) {}

    fn on_channel_inactive(&self, _ctx: &HandlerContext) {}

    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        if let Some(channel) = ctx.channel() {
            channel.on_unhandled_read(msg);
        }
    }

    fn on_read_complete(&self, _ctx: &HandlerContext) {}

    fn on_writability_changed(&self, _ctx: &HandlerContext) {}

    fn on_user_event(&self, _ctx: &HandlerContext, _event: UserEvent) {}

    fn on_exception_caught(&self, ctx: &HandlerContext, error: CoreError) {
        if let Some(pipeline) = ctx.pipeline() {
            pipeline.logger().warn(
                "unhandled error reached the pipeline tail",
                Some(&error),
                &[KeyValue::new("pipeline.error", error.code())],
            );
        }
        if let Some(channel) = ctx.channel() {
            channel.on_error_caught(error);
        }
    }
}
