//! 生命周期配对、关闭后拒绝、移除能力校验与正式移除握手。

use std::any::Any;
use std::sync::{Arc, Mutex};

use ripple_core::{
    ChainEnd, EmbeddedChannel, Handler, HandlerContext, InboundHandler, PipelineMessage,
    RemovalToken, codes,
};

/// 把生命周期回调写入共享流水账的探针。
struct LifecycleProbe {
    label: &'static str,
    removable: bool,
    journal: Arc<Mutex<Vec<String>>>,
}

impl LifecycleProbe {
    fn new(label: &'static str, removable: bool, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            label,
            removable,
            journal: Arc::clone(journal),
        })
    }

    fn record(&self, what: &str) {
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("{}:{}", self.label, what));
    }
}

impl Handler for LifecycleProbe {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_removable(&self) -> bool {
        self.removable
    }

    fn on_added(&self, _ctx: &HandlerContext) {
        self.record("added");
    }

    fn on_removed(&self, _ctx: &HandlerContext) {
        self.record("removed");
    }
}

/// 每个成功加入的 Handler，`on_added` 与 `on_removed` 恰好各一次且次序固定。
#[test]
fn lifecycle_callbacks_pair_exactly_once() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let channel = EmbeddedChannel::new();
    let pipeline = channel.pipeline();

    pipeline.add_last(
        Some(String::from("outer")),
        LifecycleProbe::new("outer", false, &journal),
    );
    pipeline.add_last(
        Some(String::from("inner")),
        LifecycleProbe::new("inner", true, &journal),
    );

    let removal = pipeline.remove_named("inner");
    channel.embedded_loop().run();
    assert!(matches!(removal.try_outcome(), Some(Ok(()))));

    assert!(!channel.finish().expect("终结不应失败"), "不应有滞留数据");

    let recorded = journal.lock().expect("journal lock");
    assert_eq!(
        recorded.as_slice(),
        [
            "outer:added",
            "inner:added",
            "inner:removed",
            "outer:removed"
        ],
        "显式移除即时配对，剩余 Handler 在通道收尾时配对"
    );
}

/// 对已关闭通道的新增失败，且生命周期回调不被触达。
#[test]
fn add_after_close_fails_without_callbacks() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let channel = EmbeddedChannel::new();
    let pipeline = Arc::clone(channel.pipeline());

    channel.finish().expect("首次终结不应失败");

    let deferred = pipeline.add_last(None, LifecycleProbe::new("late", true, &journal));
    channel.embedded_loop().run();

    match deferred.try_outcome() {
        Some(Err(error)) => assert!(
            error.is(codes::CHANNEL_IO_ON_CLOSED),
            "错误码应为 io_on_closed，实际 {}",
            error.code()
        ),
        other => panic!("新增应以错误兑现，实际 {other:?}"),
    }
    assert!(
        journal.lock().expect("journal lock").is_empty(),
        "迟到的 Handler 不应经历任何生命周期回调"
    );
}

/// 批量插入：`on_added` 按插入顺序触达每个成员。
#[test]
fn add_handlers_fires_callbacks_in_insertion_order() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let channel = EmbeddedChannel::new();
    let pipeline = channel.pipeline();

    pipeline.add_handlers(
        vec![
            LifecycleProbe::new("a", true, &journal) as Arc<dyn Handler>,
            LifecycleProbe::new("b", true, &journal),
            LifecycleProbe::new("c", true, &journal),
        ],
        ChainEnd::Last,
    );
    channel.embedded_loop().run();

    assert_eq!(
        journal.lock().expect("journal lock").as_slice(),
        ["a:added", "b:added", "c:added"],
        "批量插入的宣告顺序必须等于插入顺序"
    );
    assert_eq!(pipeline.handler_names().len(), 3);
}

/// 未声明可移除能力的 Handler 拒绝用户移除，链路不变。
#[test]
fn unremovable_handler_rejects_user_removal() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let channel = EmbeddedChannel::new();
    let pipeline = channel.pipeline();

    let handler: Arc<dyn Handler> = LifecycleProbe::new("pinned", false, &journal);
    pipeline.add_last(Some(String::from("pinned")), Arc::clone(&handler));
    let names_before = pipeline.handler_names();

    let removal = pipeline.remove_handler(&handler);
    channel.embedded_loop().run();

    match removal.try_outcome() {
        Some(Err(error)) => assert!(
            error.is(codes::PIPELINE_UNREMOVABLE_HANDLER),
            "错误码应为 unremovable_handler，实际 {}",
            error.code()
        ),
        other => panic!("移除应以错误兑现，实际 {other:?}"),
    }
    assert_eq!(
        pipeline.handler_names(),
        names_before,
        "被拒绝的移除不得改变链路"
    );
    assert_eq!(
        journal.lock().expect("journal lock").as_slice(),
        ["pinned:added"],
        "`on_removed` 不应被触达"
    );
}

/// 记录握手触达次数、立即兑现令牌的可移除 Handler。
struct FormalProbe {
    requested: Arc<Mutex<u32>>,
}

impl Handler for FormalProbe {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_removable(&self) -> bool {
        true
    }

    fn on_removal_requested(&self, ctx: &HandlerContext, token: RemovalToken) {
        *self.requested.lock().expect("counter lock") += 1;
        ctx.leave_pipeline(token);
    }
}

/// 三种移除拼写都经过 `on_removal_requested`。
#[test]
fn every_removal_spelling_goes_through_the_handshake() {
    for spelling in ["by-reference", "by-name", "by-context"] {
        let requested = Arc::new(Mutex::new(0_u32));
        let channel = EmbeddedChannel::new();
        let pipeline = channel.pipeline();
        let handler: Arc<dyn Handler> = Arc::new(FormalProbe {
            requested: Arc::clone(&requested),
        });
        pipeline.add_last(Some(String::from("target")), Arc::clone(&handler));

        let removal = match spelling {
            "by-reference" => pipeline.remove_handler(&handler),
            "by-name" => pipeline.remove_named("target"),
            _ => {
                let ctx = pipeline
                    .context_named("target")
                    .expect("目标上下文应存在");
                pipeline.remove_context(&ctx)
            }
        };
        channel.embedded_loop().run();

        assert!(
            matches!(removal.try_outcome(), Some(Ok(()))),
            "{spelling}: 移除应成功"
        );
        assert_eq!(
            *requested.lock().expect("counter lock"),
            1,
            "{spelling}: 握手应恰好触达一次"
        );
        assert!(
            pipeline.handler_names().is_empty(),
            "{spelling}: 链路应已排空"
        );
    }
}

/// 收到令牌但从不兑现的 Handler，用于验证通道收尾的强制终结。
struct TokenHoarder {
    token: Mutex<Option<RemovalToken>>,
    removed: Arc<Mutex<u32>>,
}

impl Handler for TokenHoarder {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_removable(&self) -> bool {
        true
    }

    fn on_removal_requested(&self, _ctx: &HandlerContext, token: RemovalToken) {
        *self.token.lock().expect("token lock") = Some(token);
    }

    fn on_removed(&self, _ctx: &HandlerContext) {
        *self.removed.lock().expect("counter lock") += 1;
    }
}

/// 握手悬置期间通道被终结：`on_removed` 恰好一次、移除承诺成功兑现、
/// 迟到的令牌兑现退化为 no-op。
#[test]
fn teardown_forces_pending_formal_removal() {
    let removed = Arc::new(Mutex::new(0_u32));
    let channel = EmbeddedChannel::new();
    let pipeline = channel.pipeline();
    let hoarder = Arc::new(TokenHoarder {
        token: Mutex::new(None),
        removed: Arc::clone(&removed),
    });
    pipeline.add_last(Some(String::from("hoarder")), hoarder.clone());

    let ctx = pipeline
        .context_named("hoarder")
        .expect("上下文应存在");
    let removal = pipeline.remove_named("hoarder");
    channel.embedded_loop().run();
    assert!(
        removal.try_outcome().is_none(),
        "令牌未兑现前移除承诺必须保持悬置"
    );
    assert_eq!(
        pipeline.handler_names(),
        ["hoarder"],
        "握手期间节点仍在链上"
    );

    assert!(!channel.finish().expect("终结不应失败"));
    assert!(
        matches!(removal.try_outcome(), Some(Ok(()))),
        "收尾应代为兑现移除承诺"
    );
    assert_eq!(*removed.lock().expect("counter lock"), 1);
    assert!(pipeline.handler_names().is_empty(), "流水线应以空链收场");

    let token = hoarder
        .token
        .lock()
        .expect("token lock")
        .take()
        .expect("握手应已签发令牌");
    ctx.leave_pipeline(token);
    assert_eq!(
        *removed.lock().expect("counter lock"),
        1,
        "迟到的令牌兑现不得再次触发 `on_removed`"
    );
}

/// 对同一节点重复发起移除：后到者失败，握手只发生一次。
#[test]
fn duplicate_removal_request_fails_while_pending() {
    let removed = Arc::new(Mutex::new(0_u32));
    let channel = EmbeddedChannel::new();
    let pipeline = channel.pipeline();
    pipeline.add_last(
        Some(String::from("hoarder")),
        Arc::new(TokenHoarder {
            token: Mutex::new(None),
            removed: Arc::clone(&removed),
        }),
    );

    let first = pipeline.remove_named("hoarder");
    let second = pipeline.remove_named("hoarder");
    channel.embedded_loop().run();

    assert!(first.try_outcome().is_none(), "首个请求保持悬置");
    match second.try_outcome() {
        Some(Err(error)) => assert!(
            error.is(codes::PIPELINE_HANDLER_NOT_FOUND),
            "重复请求应以 not_found 语义失败，实际 {}",
            error.code()
        ),
        other => panic!("重复请求应失败，实际 {other:?}"),
    }
    channel.finish().expect("终结不应失败");
    assert_eq!(*removed.lock().expect("counter lock"), 1);
}

/// 在 `on_read` 中对链路做同步变更：新增节点立即参与当前消息的后续走查。
struct AddOnRead {
    journal: Arc<Mutex<Vec<String>>>,
}

impl Handler for AddOnRead {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for AddOnRead {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        let pipeline = ctx.pipeline().expect("流水线应存活");
        pipeline.add_last(
            None,
            Arc::new(RecordingInbound {
                journal: Arc::clone(&self.journal),
            }) as Arc<dyn Handler>,
        );
        ctx.forward_read(msg);
    }
}

struct RecordingInbound {
    journal: Arc<Mutex<Vec<String>>>,
}

impl Handler for RecordingInbound {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for RecordingInbound {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        let text = msg.expect_user::<String>().expect("应为文本消息");
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("saw:{text}"));
        ctx.forward_read(PipelineMessage::from_user(text));
    }
}

#[test]
fn reentrant_add_is_visible_to_the_current_walk() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let channel = EmbeddedChannel::new();
    channel.pipeline().add_last(
        None,
        Arc::new(AddOnRead {
            journal: Arc::clone(&journal),
        }) as Arc<dyn Handler>,
    );

    let observed = channel
        .write_inbound(PipelineMessage::from_user(String::from("live")))
        .expect("入站注入不应失败");
    assert!(observed, "消息应穿过新增节点抵达尾哨兵");
    assert_eq!(
        journal.lock().expect("journal lock").as_slice(),
        ["saw:live"],
        "回调中新增的节点必须看到当前这条消息"
    );
}

/// 在 `on_read` 中移除自身后继续转发：当前调用期间链接保持可用。
struct RemoveSelfOnRead;

impl Handler for RemoveSelfOnRead {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_removable(&self) -> bool {
        true
    }

    fn inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for RemoveSelfOnRead {
    fn on_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        let pipeline = ctx.pipeline().expect("流水线应存活");
        let removal = pipeline.remove_named(ctx.name());
        assert!(
            matches!(removal.try_outcome(), Some(Ok(()))),
            "环内移除应同步完成"
        );
        ctx.forward_read(msg);
    }
}

#[test]
fn removing_self_during_dispatch_keeps_links_usable() {
    let channel = EmbeddedChannel::new();
    let pipeline = channel.pipeline();
    pipeline.add_last(None, Arc::new(RemoveSelfOnRead) as Arc<dyn Handler>);

    let observed = channel
        .write_inbound(PipelineMessage::from_user(String::from("first")))
        .expect("入站注入不应失败");
    assert!(observed, "自移除后的转发仍须抵达尾哨兵");
    assert!(pipeline.handler_names().is_empty(), "节点应已离场");

    let observed = channel
        .write_inbound(PipelineMessage::from_user(String::from("second")))
        .expect("入站注入不应失败");
    assert!(observed, "后续消息直达尾哨兵");
}
