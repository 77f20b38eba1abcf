//! # 延迟执行器
//!
//! ## 角色定位（Why）
//! - 某些 future 在创建时尚不知道回调应运行在哪个执行器上，需要“先占位、后绑定”；
//! - [`DeferredExecutor`] 最多缓存一个待运行的工作项，待消费者调用 [`DeferredHandle::set_executor`]
//!   后再投递；若消费者放弃（[`DeferredHandle::detach`]），缓存的工作项被丢弃。
//!
//! ## 状态机（What）
//! ```text
//! Empty --add_from--> HasFunction --set_executor--> HasExecutor
//! Empty --set_executor--> HasExecutor
//! Empty | HasFunction | HasExecutor --detach--> Detached
//! ```
//! - 每个工作项至多被运行一次：`add_from`、`set_executor` 与 `detach` 之间的每次迁移都是 CAS，
//!   只有赢得迁移的一方会从槽位中 `take` 出工作项；
//! - `Detached` 为终态，其后的 `add_from` 直接丢弃工作项，`set_executor` 为空操作；
//!   `detach` 先于 `set_executor` 完成 `HasFunction` 迁移时，缓存工作项被丢弃而非投递；
//! - 缓存工作项可附带 [`RejectHook`]：仅当 `set_executor` 释放该工作项而新执行器拒绝时被调用。
//!
//! ## 生命周期（How）
//! - 句柄 [`DeferredHandle`] 携带显式保活计数，`copy` 递增、`Drop` 递减，
//!   归零时释放缓存工作项、已绑定执行器与嵌套执行器。

use std::{fmt, sync::Arc};

use tracing::{trace, warn};

use crate::{
    executor::{ExecutorError, KeepAlive, KeepAliveTask},
    sync::{AtomicU8, AtomicUsize, Ordering, SpinLock},
};

/// 缓存工作项被绑定执行器拒绝时的兜底通知。
pub type RejectHook = Box<dyn FnOnce(ExecutorError) + Send + 'static>;

const EMPTY: u8 = 0;
const HAS_FUNCTION: u8 = 1;
const HAS_EXECUTOR: u8 = 2;
const DETACHED: u8 = 3;

/// 延迟执行器的可观测状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Empty,
    HasFunction,
    HasExecutor,
    Detached,
}

impl DeferredState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            HAS_FUNCTION => Self::HasFunction,
            HAS_EXECUTOR => Self::HasExecutor,
            DETACHED => Self::Detached,
            _ => Self::Empty,
        }
    }
}

struct ParkedWork {
    work: KeepAliveTask,
    on_reject: Option<RejectHook>,
}

/// 延迟解析的执行器本体，仅能通过 [`DeferredHandle`] 访问。
pub struct DeferredExecutor {
    state: AtomicU8,
    function: SpinLock<Option<ParkedWork>>,
    executor: SpinLock<KeepAlive>,
    nested: SpinLock<Option<Vec<DeferredHandle>>>,
    keep_alive_count: AtomicUsize,
}

impl DeferredExecutor {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            function: SpinLock::new(None),
            executor: SpinLock::new(KeepAlive::empty()),
            nested: SpinLock::new(None),
            keep_alive_count: AtomicUsize::new(1),
        }
    }

    fn add_from(
        &self,
        completing: KeepAlive,
        work: KeepAliveTask,
        on_reject: Option<RejectHook>,
    ) -> Result<(), ExecutorError> {
        let mut state = self.state.load(Ordering::Acquire);
        match state {
            DETACHED => {
                trace!(target: "spark_future::deferred", "work dropped on detached executor");
                return Ok(());
            }
            HAS_EXECUTOR => return self.run_or_submit(completing, work),
            HAS_FUNCTION => deferred_violation("add_from", state),
            _ => {}
        }

        *self.function.lock() = Some(ParkedWork { work, on_reject });
        match self.state.compare_exchange(
            EMPTY,
            HAS_FUNCTION,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                trace!(target: "spark_future::deferred", "work parked until an executor is bound");
                return Ok(());
            }
            Err(observed) => state = observed,
        }

        // 竞争失败：对端已绑定执行器或已分离，由本路径取回工作项。
        let Some(parked) = self.function.lock().take() else {
            return Ok(());
        };
        match state {
            DETACHED => {
                drop(parked);
                Ok(())
            }
            HAS_EXECUTOR => self.run_or_submit(completing, parked.work),
            other => deferred_violation("add_from", other),
        }
    }

    fn run_or_submit(&self, completing: KeepAlive, work: KeepAliveTask) -> Result<(), ExecutorError> {
        let executor = self.executor.lock().clone();
        if completing.ptr_eq(&executor) {
            work(completing);
            Ok(())
        } else {
            executor.add(work)
        }
    }

    fn submit(&self, work: KeepAliveTask) -> Result<(), ExecutorError> {
        let executor = self.executor.lock().clone();
        executor.add(work)
    }

    fn set_executor(&self, executor: KeepAlive) -> Result<(), ExecutorError> {
        if let Some(nested) = self.nested_copies() {
            for child in &nested {
                if let Err(error) = child.set_executor(executor.clone()) {
                    warn!(target: "spark_future::deferred", %error, "nested deferred executor rejected work");
                }
            }
        }

        let mut state = self.state.load(Ordering::Acquire);
        match state {
            DETACHED => return Ok(()),
            HAS_EXECUTOR => deferred_violation("set_executor", state),
            _ => {}
        }

        *self.executor.lock() = executor;
        if state == EMPTY {
            match self.state.compare_exchange(
                EMPTY,
                HAS_EXECUTOR,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(target: "spark_future::deferred", "executor bound before any work arrived");
                    return Ok(());
                }
                Err(observed) => state = observed,
            }
        }

        if state == HAS_FUNCTION {
            match self.state.compare_exchange(
                HAS_FUNCTION,
                HAS_EXECUTOR,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return self.release_parked(),
                Err(observed) => state = observed,
            }
        }

        match state {
            DETACHED => {
                trace!(target: "spark_future::deferred", "executor binding lost to detach");
                Ok(())
            }
            other => deferred_violation("set_executor", other),
        }
    }

    fn release_parked(&self) -> Result<(), ExecutorError> {
        let Some(ParkedWork { work, on_reject }) = self.function.lock().take() else {
            return Ok(());
        };
        trace!(target: "spark_future::deferred", "releasing parked work to bound executor");
        let Err(error) = self.submit(work) else {
            return Ok(());
        };
        warn!(target: "spark_future::deferred", %error, "bound executor rejected parked work");
        if let Some(on_reject) = on_reject {
            on_reject(error.clone());
        }
        Err(error)
    }

    fn detach(&self) {
        if let Some(nested) = self.nested_copies() {
            for child in &nested {
                child.detach();
            }
        }

        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state == DETACHED {
                return;
            }
            match self.state.compare_exchange(
                state,
                DETACHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => state = observed,
            }
        }

        // 仅从 HasFunction 迁出时缓存工作项归本路径所有。
        if state == HAS_FUNCTION {
            let parked = self.function.lock().take();
            if parked.is_some() {
                trace!(target: "spark_future::deferred", "parked work dropped on detach");
            }
        }
    }

    fn nested_copies(&self) -> Option<Vec<DeferredHandle>> {
        self.nested
            .lock()
            .as_ref()
            .map(|nested| nested.iter().map(DeferredHandle::copy).collect())
    }

    fn set_nested_executors(&self, executors: Vec<DeferredHandle>) {
        let mut nested = self.nested.lock();
        if nested.is_some() {
            drop(nested);
            deferred_violation("set_nested_executors", self.state.load(Ordering::Acquire));
        }
        *nested = Some(executors);
    }

    fn release(&self) {
        let parked = self.function.lock().take();
        let executor = std::mem::take(&mut *self.executor.lock());
        let nested = self.nested.lock().take();
        drop((parked, executor, nested));
    }
}

#[cold]
#[track_caller]
fn deferred_violation(operation: &'static str, raw: u8) -> ! {
    let state = DeferredState::from_raw(raw);
    tracing::error!(target: "spark_future::deferred", operation, ?state, "deferred executor protocol violation");
    panic!("deferred executor protocol violation: `{operation}` in state {state:?}");
}

/// [`DeferredExecutor`] 的保活句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：共享状态、嵌套链与消费者都可能持有同一延迟执行器，
///   需要一个与 `Arc` 强引用数解耦、可被断言的保活计数。
/// - **契约 (What)**：`new` 创建计数为 1 的执行器；[`copy`](Self::copy) 返回新句柄并递增计数；
///   任意句柄 `Drop` 时递减，最后一个句柄释放全部托管资源。
/// - **注意 (Gotchas)**：`Clone` 未实现，复制意图必须显式写成 `copy()`。
pub struct DeferredHandle {
    inner: Arc<DeferredExecutor>,
}

impl DeferredHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DeferredExecutor::new()),
        }
    }

    pub fn copy(&self) -> Self {
        self.inner.keep_alive_count.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// 提交工作项；`completing` 为完成方当前所在执行器，用于判断是否可以就地运行。
    pub fn add_from(&self, completing: KeepAlive, work: KeepAliveTask) -> Result<(), ExecutorError> {
        self.inner.add_from(completing, work, None)
    }

    /// 同 [`add_from`](Self::add_from)，但工作项若被缓存，之后又被 `set_executor` 绑定的执行器拒绝，
    /// 则以该错误调用 `on_reject`。
    ///
    /// 同步返回的 `Err`、分离或句柄释放都不会触发 `on_reject`，只会将其丢弃。
    pub fn add_from_with_fallback(
        &self,
        completing: KeepAlive,
        work: KeepAliveTask,
        on_reject: RejectHook,
    ) -> Result<(), ExecutorError> {
        self.inner.add_from(completing, work, Some(on_reject))
    }

    /// 绑定执行器（先传播给嵌套执行器），并释放已缓存的工作项。
    ///
    /// 返回 `Err` 表示缓存的工作项被新执行器拒绝并已丢弃；附带的 [`RejectHook`] 在返回前已被调用。
    pub fn set_executor(&self, executor: KeepAlive) -> Result<(), ExecutorError> {
        self.inner.set_executor(executor)
    }

    pub fn set_nested_executors(&self, executors: Vec<DeferredHandle>) {
        self.inner.set_nested_executors(executors);
    }

    pub fn detach(&self) {
        self.inner.detach();
    }

    pub fn state(&self) -> DeferredState {
        DeferredState::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_detached(&self) -> bool {
        self.state() == DeferredState::Detached
    }

    /// 已绑定的执行器；尚未绑定时返回空句柄。
    pub fn executor(&self) -> KeepAlive {
        if self.state() == DeferredState::HasExecutor {
            self.inner.executor.lock().clone()
        } else {
            KeepAlive::empty()
        }
    }

    pub fn keep_alive_count(&self) -> usize {
        self.inner.keep_alive_count.load(Ordering::Acquire)
    }

    pub fn same_executor(&self, other: &DeferredHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for DeferredHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredHandle {
    fn drop(&mut self) {
        if self.inner.keep_alive_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.release();
        }
    }
}

impl fmt::Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle")
            .field("state", &self.state())
            .field("keep_alive_count", &self.keep_alive_count())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::{
        executor::InlineExecutor,
        test_stubs::{ManualExecutor, RejectingExecutor},
    };
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    fn counting_task(counter: &Arc<StdAtomicUsize>) -> KeepAliveTask {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn parked_work_runs_once_executor_is_bound() {
        let hits = Arc::new(StdAtomicUsize::new(0));
        let manual = ManualExecutor::new();
        let deferred = DeferredHandle::new();

        deferred
            .add_from(KeepAlive::empty(), counting_task(&hits))
            .expect("parking never fails");
        assert_eq!(deferred.state(), DeferredState::HasFunction);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        deferred
            .set_executor(manual.keep_alive())
            .expect("manual executor accepts work");
        assert_eq!(deferred.state(), DeferredState::HasExecutor);
        assert_eq!(manual.pending(), 1);
        assert_eq!(manual.run_all(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bound_executor_receives_work_directly() {
        let hits = Arc::new(StdAtomicUsize::new(0));
        let manual = ManualExecutor::new();
        let deferred = DeferredHandle::new();
        deferred.set_executor(manual.keep_alive()).expect("no parked work");

        deferred
            .add_from(KeepAlive::empty(), counting_task(&hits))
            .expect("manual executor accepts work");
        assert_eq!(manual.pending(), 1);
        manual.run_all();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn matching_completing_executor_runs_inline() {
        let hits = Arc::new(StdAtomicUsize::new(0));
        let manual = ManualExecutor::new();
        let deferred = DeferredHandle::new();
        deferred.set_executor(manual.keep_alive()).expect("no parked work");

        deferred
            .add_from(manual.keep_alive(), counting_task(&hits))
            .expect("inline run");
        assert_eq!(manual.pending(), 0, "同一执行器完成时不应再次排队");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_drops_parked_work_and_future_additions() {
        let hits = Arc::new(StdAtomicUsize::new(0));
        let deferred = DeferredHandle::new();
        deferred
            .add_from(KeepAlive::empty(), counting_task(&hits))
            .expect("parking never fails");
        deferred.detach();
        assert!(deferred.is_detached());

        let manual = ManualExecutor::new();
        deferred
            .set_executor(manual.keep_alive())
            .expect("set_executor after detach is a no-op");
        deferred
            .add_from(KeepAlive::empty(), counting_task(&hits))
            .expect("dropped silently");
        assert_eq!(manual.pending(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_executors_inherit_binding_and_detach() {
        let hits = Arc::new(StdAtomicUsize::new(0));
        let outer = DeferredHandle::new();
        let inner = DeferredHandle::new();
        inner
            .add_from(KeepAlive::empty(), counting_task(&hits))
            .expect("parking never fails");
        outer.set_nested_executors(vec![inner.copy()]);

        outer
            .set_executor(KeepAlive::of(InlineExecutor))
            .expect("inline executor accepts work");
        assert_eq!(inner.state(), DeferredState::HasExecutor);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let detached_outer = DeferredHandle::new();
        let detached_inner = DeferredHandle::new();
        detached_outer.set_nested_executors(vec![detached_inner.copy()]);
        detached_outer.detach();
        assert!(detached_inner.is_detached());
    }

    #[test]
    fn keep_alive_count_tracks_copies() {
        let deferred = DeferredHandle::new();
        let copy = deferred.copy();
        assert_eq!(deferred.keep_alive_count(), 2);
        assert!(copy.same_executor(&deferred));
        drop(copy);
        assert_eq!(deferred.keep_alive_count(), 1);
    }

    #[test]
    fn last_handle_releases_parked_work() {
        struct DropCounter(Arc<StdAtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(StdAtomicUsize::new(0));
        let guard = DropCounter(Arc::clone(&drops));
        let deferred = DeferredHandle::new();
        deferred
            .add_from(
                KeepAlive::empty(),
                Box::new(move |_| {
                    let _guard = &guard;
                }),
            )
            .expect("parking never fails");
        let copy = deferred.copy();
        drop(deferred);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejection_of_parked_work_is_reported() {
        let deferred = DeferredHandle::new();
        deferred
            .add_from(KeepAlive::empty(), Box::new(|_| {}))
            .expect("parking never fails");
        let result = deferred.set_executor(KeepAlive::of(RejectingExecutor::new("closed")));
        assert!(matches!(result, Err(ExecutorError::Rejected { .. })));
        assert_eq!(deferred.state(), DeferredState::HasExecutor);
    }

    #[test]
    fn late_rejection_reaches_fallback_exactly_once() {
        let hits = Arc::new(StdAtomicUsize::new(0));
        let rejections = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&rejections);
        let deferred = DeferredHandle::new();
        deferred
            .add_from_with_fallback(
                KeepAlive::empty(),
                counting_task(&hits),
                Box::new(move |error| sink.lock().expect("rejection lock").push(error)),
            )
            .expect("parking never fails");

        let result = deferred.set_executor(KeepAlive::of(RejectingExecutor::new("closed")));
        let error = result.expect_err("rejecting executor refuses parked work");
        assert_eq!(*rejections.lock().expect("rejection lock"), vec![error]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fallback_is_dropped_when_work_runs_or_is_detached() {
        let fallbacks = Arc::new(StdAtomicUsize::new(0));
        let fallback = |counter: &Arc<StdAtomicUsize>| -> RejectHook {
            let counter = Arc::clone(counter);
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };

        let hits = Arc::new(StdAtomicUsize::new(0));
        let bound = DeferredHandle::new();
        bound
            .add_from_with_fallback(KeepAlive::empty(), counting_task(&hits), fallback(&fallbacks))
            .expect("parking never fails");
        bound
            .set_executor(KeepAlive::of(InlineExecutor))
            .expect("inline executor accepts work");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let detached = DeferredHandle::new();
        detached
            .add_from_with_fallback(KeepAlive::empty(), counting_task(&hits), fallback(&fallbacks))
            .expect("parking never fails");
        detached.detach();
        detached
            .set_executor(KeepAlive::of(RejectingExecutor::new("closed")))
            .expect("binding after detach is a no-op");
        assert_eq!(detached.state(), DeferredState::Detached);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn synchronous_rejection_is_returned_without_fallback() {
        let fallbacks = Arc::new(StdAtomicUsize::new(0));
        let counter = Arc::clone(&fallbacks);
        let deferred = DeferredHandle::new();
        deferred
            .set_executor(KeepAlive::of(RejectingExecutor::new("closed")))
            .expect("no parked work");

        let result = deferred.add_from_with_fallback(
            KeepAlive::empty(),
            Box::new(|_| {}),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(matches!(result, Err(ExecutorError::Rejected { .. })));
        assert_eq!(fallbacks.load(Ordering::SeqCst), 0, "调用方自行处理同步拒绝");
    }

    #[test]
    fn detach_after_binding_keeps_submitted_work() {
        let hits = Arc::new(StdAtomicUsize::new(0));
        let manual = ManualExecutor::new();
        let deferred = DeferredHandle::new();
        deferred
            .add_from(KeepAlive::empty(), counting_task(&hits))
            .expect("parking never fails");
        deferred
            .set_executor(manual.keep_alive())
            .expect("manual executor accepts work");
        deferred.detach();
        assert!(deferred.is_detached());
        assert_eq!(manual.run_all(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "deferred executor protocol violation")]
    fn second_add_while_parked_is_fatal() {
        let deferred = DeferredHandle::new();
        let _ = deferred.add_from(KeepAlive::empty(), Box::new(|_| {}));
        let _ = deferred.add_from(KeepAlive::empty(), Box::new(|_| {}));
    }

    #[test]
    #[should_panic(expected = "deferred executor protocol violation")]
    fn rebinding_executor_is_fatal() {
        let deferred = DeferredHandle::new();
        let _ = deferred.set_executor(KeepAlive::of(InlineExecutor));
        let _ = deferred.set_executor(KeepAlive::of(InlineExecutor));
    }
}
