//! 延迟结果语义：续体次序、非重入兑现、组合子与跨线程等待。

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ripple_core::{CoreError, EmbeddedEventLoop, EventLoop, Promise, codes};

fn make_pair<T: Send + Sync + 'static>(
    event_loop: &Arc<EmbeddedEventLoop>,
) -> (Promise<T>, ripple_core::DeferredResult<T>) {
    let promise = Promise::new(Arc::clone(event_loop) as Arc<dyn EventLoop>);
    let deferred = promise.deferred();
    (promise, deferred)
}

/// 续体按注册顺序执行，且绝不在兑现方的栈帧内运行。
#[test]
fn continuations_run_in_order_on_the_loop() {
    let event_loop = EmbeddedEventLoop::new();
    let (promise, deferred) = make_pair::<u32>(&event_loop);
    let journal = Arc::new(Mutex::new(Vec::new()));

    for index in 0..3 {
        let journal = Arc::clone(&journal);
        deferred.on_complete(move |result| {
            let value = *result.as_ref().expect("应为成功值");
            journal
                .lock()
                .expect("journal lock")
                .push(format!("{index}:{value}"));
        });
    }

    promise.succeed(7);
    assert!(
        journal.lock().expect("journal lock").is_empty(),
        "兑现本身不得同步运行续体"
    );

    event_loop.run();
    assert_eq!(
        journal.lock().expect("journal lock").as_slice(),
        ["0:7", "1:7", "2:7"],
        "续体必须按注册顺序执行"
    );

    let journal_late = Arc::clone(&journal);
    deferred.on_complete(move |result| {
        let value = *result.as_ref().expect("应为成功值");
        journal_late
            .lock()
            .expect("journal lock")
            .push(format!("late:{value}"));
    });
    event_loop.run();
    assert_eq!(
        journal.lock().expect("journal lock").last().map(String::as_str),
        Some("late:7"),
        "兑现后注册的续体同样经循环队列执行"
    );
}

/// `map` 变换成功值，失败原样透传。
#[test]
fn map_transforms_success_and_propagates_failure() {
    let event_loop = EmbeddedEventLoop::new();

    let (promise, deferred) = make_pair::<u32>(&event_loop);
    let doubled = deferred.map(|value| value * 2);
    promise.succeed(21);
    event_loop.run();
    assert!(matches!(doubled.try_outcome(), Some(Ok(42))));

    let (promise, deferred) = make_pair::<u32>(&event_loop);
    let mapped = deferred.map(|value| value + 1);
    promise.fail(CoreError::new(codes::TRANSPORT_IO, "boom"));
    event_loop.run();
    match mapped.try_outcome() {
        Some(Err(error)) => assert!(error.is(codes::TRANSPORT_IO), "失败应原样透传"),
        other => panic!("应观察到失败，实际 {other:?}"),
    }
}

/// `flat_map` 把两段异步完成串接为一个可观察结果。
#[test]
fn flat_map_chains_two_deferred_results() {
    let event_loop = EmbeddedEventLoop::new();
    let (outer_promise, outer) = make_pair::<u32>(&event_loop);
    let (inner_promise, inner) = make_pair::<String>(&event_loop);

    let inner_slot = Arc::new(Mutex::new(Some(inner)));
    let chained = outer.flat_map(move |value| {
        let inner = inner_slot
            .lock()
            .expect("slot lock")
            .take()
            .expect("内层结果只消费一次");
        assert_eq!(*value, 5);
        inner
    });

    outer_promise.succeed(5);
    event_loop.run();
    assert!(chained.try_outcome().is_none(), "内层未兑现前整体保持悬置");

    inner_promise.succeed(String::from("done"));
    event_loop.run();
    match chained.try_outcome() {
        Some(Ok(text)) => assert_eq!(text, "done"),
        other => panic!("串接结果应成功，实际 {other:?}"),
    }
}

/// 跨线程兑现 + `wait`：单元是框架中唯一的跨线程对象。
#[test]
fn wait_blocks_a_foreign_thread_until_fulfilled() {
    let event_loop = EmbeddedEventLoop::new();
    let (promise, deferred) = make_pair::<u32>(&event_loop);

    let waiter = thread::spawn(move || deferred.wait());

    // 从外部线程兑现：值写入单元，续体折返属主循环。
    let fulfiller = thread::spawn(move || promise.succeed(11));
    fulfiller.join().expect("兑现线程不应 panic");

    while !waiter.is_finished() {
        event_loop.run();
        thread::sleep(Duration::from_millis(1));
    }
    let value = waiter
        .join()
        .expect("等待线程不应 panic")
        .expect("应观察到成功值");
    assert_eq!(value, 11);
}

/// 在属主循环上调用 `wait` 是程序员错误。
#[test]
#[should_panic(expected = "wait")]
fn wait_on_the_owning_loop_panics() {
    let event_loop = EmbeddedEventLoop::new();
    let (_promise, deferred) = make_pair::<u32>(&event_loop);
    let _ = deferred.wait();
}
