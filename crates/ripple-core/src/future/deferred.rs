use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::CoreError;
use crate::eventloop::EventLoop;

type Completion<T> = Box<dyn FnOnce(&Result<T, CoreError>) + Send + 'static>;

enum CellState<T> {
    Pending(Vec<Completion<T>>),
    Fulfilled(Arc<Result<T, CoreError>>),
}

/// 单赋值单元：值或错误，附带注册顺序的续体队列。
///
/// # 教案式说明
/// - **意图（Why）**：兑现方与观察方可能位于不同线程，单元必须自带同步；
///   除此之外框架的全部状态都被事件循环串行化，无需加锁。
/// - **逻辑（How）**：`Pending` 态积累续体；兑现时一次性取出续体并连同共享结果
///   投递到属主循环执行，单元翻转为 `Fulfilled`。之后注册的续体各自入队，
///   FIFO 性质保证观察顺序等于注册顺序。
/// - **契约（What）**：二次兑现是程序员错误，直接 panic；续体永不在兑现方的
///   调用栈上运行。
struct DeferredCell<T> {
    executor: Arc<dyn EventLoop>,
    state: Mutex<CellState<T>>,
}

impl<T: Send + Sync + 'static> DeferredCell<T> {
    fn complete(&self, result: Result<T, CoreError>) {
        let (callbacks, shared) = {
            let mut state = self.state.lock();
            match &mut *state {
                CellState::Fulfilled(_) => {
                    panic!("deferred result fulfilled twice")
                }
                CellState::Pending(callbacks) => {
                    let callbacks = core::mem::take(callbacks);
                    let shared = Arc::new(result);
                    *state = CellState::Fulfilled(Arc::clone(&shared));
                    (callbacks, shared)
                }
            }
        };
        if callbacks.is_empty() {
            return;
        }
        self.executor.execute(Box::new(move || {
            for callback in callbacks {
                callback(&shared);
            }
        }));
    }

    fn on_complete(&self, callback: Completion<T>) {
        let fulfilled = {
            let mut state = self.state.lock();
            match &mut *state {
                CellState::Pending(callbacks) => {
                    callbacks.push(callback);
                    None
                }
                CellState::Fulfilled(shared) => Some((callback, Arc::clone(shared))),
            }
        };
        if let Some((callback, shared)) = fulfilled {
            self.executor.execute(Box::new(move || callback(&shared)));
        }
    }
}

/// 延迟结果的写入半边。
///
/// # 契约说明（What）
/// - **单赋值**：`succeed`/`fail` 合计只允许调用一次，重复兑现 panic；
/// - **兑现线程**：允许从任意线程兑现，续体仍在属主循环上按注册顺序执行；
/// - **所有权**：写入半边不可克隆，天然保证兑现权唯一。
pub struct Promise<T> {
    cell: Arc<DeferredCell<T>>,
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// 针对属主循环创建新的延迟结果对。
    pub fn new(executor: Arc<dyn EventLoop>) -> Self {
        Self {
            cell: Arc::new(DeferredCell {
                executor,
                state: Mutex::new(CellState::Pending(Vec::new())),
            }),
        }
    }

    /// 取得读取半边；可多次调用，彼此观察同一单元。
    pub fn deferred(&self) -> DeferredResult<T> {
        DeferredResult {
            cell: Arc::clone(&self.cell),
        }
    }

    /// 以成功值兑现。
    pub fn succeed(self, value: T) {
        self.cell.complete(Ok(value));
    }

    /// 以失败兑现。
    pub fn fail(self, error: CoreError) {
        self.cell.complete(Err(error));
    }
}

/// 延迟结果的读取半边。
///
/// # 教案式说明
/// - **意图（Why）**：把"何时完成"与"如何使用结果"解耦，调用方既可以注册续体，
///   也可以组合出新的延迟结果，或在外部线程阻塞等待。
/// - **逻辑（How）**：全部组合子都落到 [`DeferredResult::on_complete`] 上；
///   续体拿到的是 `&Result`，多观察者共享同一份结果。
/// - **契约（What)**：`wait` 禁止在属主循环上调用（会饿死兑现路径），违者 panic。
pub struct DeferredResult<T> {
    cell: Arc<DeferredCell<T>>,
}

impl<T> Clone for DeferredResult<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Send + Sync + 'static> DeferredResult<T> {
    /// 注册完成续体；续体在属主循环上按注册顺序执行。
    pub fn on_complete(&self, callback: impl FnOnce(&Result<T, CoreError>) + Send + 'static) {
        self.cell.on_complete(Box::new(callback));
    }

    /// 成功值映射，失败原样透传。
    pub fn map<U: Send + Sync + 'static>(
        &self,
        transform: impl FnOnce(&T) -> U + Send + 'static,
    ) -> DeferredResult<U> {
        let promise = Promise::new(Arc::clone(&self.cell.executor));
        let next = promise.deferred();
        self.on_complete(move |result| match result {
            Ok(value) => promise.succeed(transform(value)),
            Err(error) => promise.fail(error.clone()),
        });
        next
    }

    /// 成功值串接下一个延迟结果，失败原样透传。
    ///
    /// `U: Clone` 源于内层结果以共享引用暴露：续体只能读到 `&U`，
    /// 向外层单元转移所有权需要一次克隆。
    pub fn flat_map<U: Clone + Send + Sync + 'static>(
        &self,
        transform: impl FnOnce(&T) -> DeferredResult<U> + Send + 'static,
    ) -> DeferredResult<U> {
        let promise = Promise::new(Arc::clone(&self.cell.executor));
        let next = promise.deferred();
        self.on_complete(move |result| match result {
            Ok(value) => {
                let inner = transform(value);
                inner.on_complete(move |inner_result| match inner_result {
                    Ok(inner_value) => promise.succeed(inner_value.clone()),
                    Err(error) => promise.fail(error.clone()),
                });
            }
            Err(error) => promise.fail(error.clone()),
        });
        next
    }

    /// 非阻塞地窥视结果；未兑现时返回 `None`。
    pub fn try_outcome(&self) -> Option<Result<T, CoreError>>
    where
        T: Clone,
    {
        let state = self.cell.state.lock();
        match &*state {
            CellState::Pending(_) => None,
            CellState::Fulfilled(shared) => Some((**shared).clone()),
        }
    }

    /// 阻塞当前线程直至兑现。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：必须从属主循环之外的线程调用；在环内调用会阻塞兑现路径，
    ///   属于程序员错误，直接 panic。
    #[cfg(feature = "std")]
    pub fn wait(&self) -> Result<T, CoreError>
    where
        T: Clone,
    {
        assert!(
            !self.cell.executor.in_loop(),
            "DeferredResult::wait 不得在属主事件循环上调用"
        );
        let (sender, receiver) = std::sync::mpsc::channel();
        self.on_complete(move |result| {
            let _ = sender.send(result.clone());
        });
        receiver
            .recv()
            .expect("延迟结果单元在兑现前被整体丢弃")
    }
}
