//! 测试桩命名空间：集中提供手动驱动与拒绝投递的执行器。
//!
//! # 设计背景（Why）
//! - 共享状态的大部分分支取决于“回调何时、在哪个执行器上运行”，
//!   手动执行器让测试可以精确控制这一时刻；
//! - 拒绝执行器用于覆盖投递失败的降级路径。

use std::{
    borrow::Cow,
    collections::VecDeque,
    sync::Arc,
};

use crate::{
    executor::{Executor, ExecutorError, KeepAlive, Task},
    sync::{AtomicUsize, Ordering},
};

#[derive(Default)]
struct ManualQueue {
    tasks: spin::Mutex<VecDeque<Task>>,
}

impl Executor for ManualQueue {
    fn add(&self, task: Task) -> Result<(), ExecutorError> {
        self.tasks.lock().push_back(task);
        Ok(())
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("manual")
    }
}

/// 任务只在测试显式调用 `run_*` 时运行的执行器。
///
/// 同一实例的 [`keep_alive`](Self::keep_alive) 始终指向同一执行器，满足身份比较。
#[derive(Clone)]
pub struct ManualExecutor {
    queue: Arc<ManualQueue>,
    handle: KeepAlive,
}

impl ManualExecutor {
    pub fn new() -> Self {
        let queue = Arc::new(ManualQueue::default());
        let handle = KeepAlive::new(Arc::clone(&queue) as Arc<dyn Executor>);
        Self { queue, handle }
    }

    pub fn keep_alive(&self) -> KeepAlive {
        self.handle.clone()
    }

    pub fn pending(&self) -> usize {
        self.queue.tasks.lock().len()
    }

    /// 运行队首任务，返回是否有任务被运行。
    pub fn run_one(&self) -> bool {
        let next = self.queue.tasks.lock().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// 运行直至队列为空（包括运行期间新入队的任务），返回运行的任务数。
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// 丢弃全部排队任务而不运行，返回丢弃数量。
    pub fn discard_all(&self) -> usize {
        let drained: Vec<Task> = self.queue.tasks.lock().drain(..).collect();
        drained.len()
    }
}

impl Default for ManualExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// 拒绝一切任务的执行器，并统计被拒绝次数。
pub struct RejectingExecutor {
    reason: Cow<'static, str>,
    attempts: AtomicUsize,
}

impl RejectingExecutor {
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }
}

impl Executor for RejectingExecutor {
    fn add(&self, task: Task) -> Result<(), ExecutorError> {
        drop(task);
        self.attempts.fetch_add(1, Ordering::AcqRel);
        Err(ExecutorError::rejected("rejecting", self.reason.clone()))
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("rejecting")
    }
}
