//! # SharedState：promise/future 之间的共享状态机
//!
//! ## 角色定位（Why）
//! - 一对 promise/future 共享一个 [`SharedState`]：生产者写入结果，消费者挂接回调，
//!   两者谁先到达都必须保证回调恰好运行一次；
//! - 生产者也可以把自己“转发”到另一个共享状态（proxy），此后消费者的回调直接挂到目标上。
//!
//! ## 并发模型（How）
//! - 状态标签保存在 `AtomicU8` 中，所有迁移都以 acquire/release 的 CAS 完成；
//!   每种迁移只会发生一次，谁在 CAS 中失败谁负责推进后续动作；
//! - 结果、回调、执行器槽位各自用轻量锁包装以保持 `#![deny(unsafe_code)]`，
//!   但由状态机纪律保证两侧从不同时写同一槽位；
//! - `attached` 计数挂接方（生产者、消费者以及投递中的回调），归零时按终态拆除；
//!   `callback_refs` 计数投递中的回调引用，归零时丢弃未运行的回调。
//!
//! ## 契约（What）
//! - 违反协议（重复写结果、重复挂回调、在错误状态拆除）立即 panic，且在 panic 前输出
//!   `error` 级别日志；
//! - 执行器拒绝投递时，结果被替换为 [`FutureError::ExecutorRejected`] 并就地调用回调，
//!   消费者仍然只看到一次回调；延迟执行器在稍后绑定时才拒绝的情形同样如此。

mod bound;
mod reference;
mod state;

pub use bound::BoundExecutor;
pub use state::{CoreState, InlineContinuation};

use std::{fmt, mem, sync::Arc};

use tracing::{trace, warn};

use crate::{
    context::RequestContext,
    deferred::{DeferredHandle, RejectHook},
    error::{FutureError, Try},
    executor::{ExecutorError, KeepAlive, KeepAliveTask},
    interrupt::{InterruptChannel, InterruptHandler},
    sync::{AtomicU8, Ordering, SpinLock},
};

use reference::{AttachedReference, CallbackReference};

/// 消费者回调：收到运行所在执行器的句柄与结果。
pub type Callback<T> = Box<dyn FnOnce(KeepAlive, Try<T>) + Send + 'static>;

struct CallbackSlot<T> {
    callback: Callback<T>,
    context: Option<RequestContext>,
}

/// 结果与转发目标共用的槽位。
enum Payload<T> {
    Vacant,
    Result(Try<T>),
    Proxy(Arc<SharedState<T>>),
}

const START: u8 = CoreState::Start.bits();

/// promise/future 共享状态。
///
/// # 教案式说明
/// - **意图 (Why)**：在无锁的前提下协调“结果先到”与“回调先到”两种竞态，并支持转发与中断。
/// - **契约 (What)**：
///   - [`set_result`](Self::set_result)、[`set_proxy`](Self::set_proxy) 由生产者调用且二者合计至多一次；
///   - [`set_callback`](Self::set_callback) 由消费者调用至多一次；
///   - 生产者与消费者各自以 `detach_*` 释放挂接引用；
/// - **风险 (Gotchas)**：回调内不得再次对同一共享状态调用 `set_callback`；
///   [`with_result`](Self::with_result) 的闭包在槽位锁内运行，必须短小且不可重入。
pub struct SharedState<T> {
    state: AtomicU8,
    attached: AtomicU8,
    callback_refs: AtomicU8,
    payload: SpinLock<Payload<T>>,
    callback: SpinLock<Option<CallbackSlot<T>>>,
    executor: SpinLock<BoundExecutor>,
    interrupt: InterruptChannel,
}

impl<T: Send + 'static> SharedState<T> {
    /// 创建处于 `Start` 的共享状态，生产者与消费者各持一个挂接引用。
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_parts(CoreState::Start, 2, Payload::Vacant))
    }

    /// 创建已就绪的共享状态，仅消费者挂接。
    pub fn make_ready(result: Try<T>) -> Arc<Self> {
        Arc::new(Self::with_parts(
            CoreState::OnlyResult,
            1,
            Payload::Result(result),
        ))
    }

    fn with_parts(state: CoreState, attached: u8, payload: Payload<T>) -> Self {
        Self {
            state: AtomicU8::new(state.bits()),
            attached: AtomicU8::new(attached),
            callback_refs: AtomicU8::new(0),
            payload: SpinLock::new(payload),
            callback: SpinLock::new(None),
            executor: SpinLock::new(BoundExecutor::Inline),
            interrupt: InterruptChannel::new(),
        }
    }

    pub fn state(&self) -> CoreState {
        CoreState::from_bits(self.state.load(Ordering::Acquire))
    }

    pub fn has_callback(&self) -> bool {
        self.state().is_in(CoreState::CALLBACK_ATTACHED)
    }

    /// 结果是否可读；转发状态下沿转发链判断目标。
    pub fn has_result(&self) -> bool {
        let state = self.state();
        if state == CoreState::Proxy {
            return self.proxy_target().is_some_and(|target| target.has_result());
        }
        state.is_in(CoreState::RESULT_READABLE)
    }

    pub fn ready(&self) -> bool {
        self.has_result()
    }

    /// 借用结果（沿转发链）；结果尚未写入或已交给回调时返回 `None`。
    pub fn with_result<R>(&self, f: impl FnOnce(&Try<T>) -> R) -> Option<R> {
        let state = self.state();
        if state == CoreState::Proxy {
            return self.proxy_target()?.with_result(f);
        }
        if !state.is_in(CoreState::RESULT_READABLE) {
            return None;
        }
        match &*self.payload.lock() {
            Payload::Result(result) => Some(f(result)),
            _ => None,
        }
    }

    pub fn attached_count(&self) -> u8 {
        self.attached.load(Ordering::Acquire)
    }

    pub fn callback_ref_count(&self) -> u8 {
        self.callback_refs.load(Ordering::Acquire)
    }

    /// 绑定回调执行器；必须在挂接回调之前调用。
    pub fn set_executor(&self, executor: impl Into<BoundExecutor>) {
        let state = self.state();
        if state.is_in(CoreState::CALLBACK_ATTACHED) {
            protocol_violation("set_executor", state);
        }
        *self.executor.lock() = executor.into();
    }

    pub fn executor(&self) -> Option<KeepAlive> {
        self.executor.lock().keep_alive().cloned()
    }

    pub fn deferred_executor(&self) -> Option<DeferredHandle> {
        self.executor.lock().deferred().map(DeferredHandle::copy)
    }

    /// 取走绑定的延迟执行器，普通执行器保持不变。
    pub fn steal_deferred_executor(&self) -> Option<DeferredHandle> {
        let mut slot = self.executor.lock();
        match mem::take(&mut *slot) {
            BoundExecutor::Deferred(handle) => Some(handle),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// 生产者写入结果。
    ///
    /// `completing` 为生产者当前所在执行器；仅当消费者允许就地运行且与回调绑定的执行器相同时，
    /// 回调才会在此调用内同步运行。
    pub fn set_result(self: &Arc<Self>, completing: KeepAlive, result: Try<T>) {
        let mut state = self.state();
        if !state.is_in(START | CoreState::AWAITING_RESULT) {
            protocol_violation("set_result", state);
        }
        *self.payload.lock() = Payload::Result(result);

        if state == CoreState::Start {
            match self.transition(CoreState::Start, CoreState::OnlyResult) {
                Ok(()) => {
                    trace!(target: "spark_future::shared", "Start -> OnlyResult");
                    return;
                }
                Err(observed) => state = observed,
            }
            if !state.is_in(CoreState::AWAITING_RESULT) {
                protocol_violation("set_result", state);
            }
        }

        self.state.store(CoreState::Done.bits(), Ordering::Release);
        trace!(target: "spark_future::shared", prior = ?state, "-> Done");
        self.do_callback(completing, state);
    }

    /// 消费者挂接回调，`context` 会在回调运行期间被安装为当前请求上下文。
    pub fn set_callback<F>(
        self: &Arc<Self>,
        callback: F,
        context: Option<RequestContext>,
        allow_inline: InlineContinuation,
    ) where
        F: FnOnce(KeepAlive, Try<T>) + Send + 'static,
    {
        self.install_callback(
            CallbackSlot {
                callback: Box::new(callback),
                context,
            },
            allow_inline,
        );
    }

    fn install_callback(self: &Arc<Self>, slot: CallbackSlot<T>, allow_inline: InlineContinuation) {
        let mut state = self.state();
        if !state.is_in(START | CoreState::OnlyResult.bits() | CoreState::Proxy.bits()) {
            protocol_violation("set_callback", state);
        }
        *self.callback.lock() = Some(slot);

        if state == CoreState::Start {
            let next = allow_inline.awaiting_state();
            match self.transition(CoreState::Start, next) {
                Ok(()) => {
                    trace!(target: "spark_future::shared", next = ?next, "Start -> awaiting result");
                    return;
                }
                Err(observed) => state = observed,
            }
        }

        match state {
            CoreState::OnlyResult => {
                self.state.store(CoreState::Done.bits(), Ordering::Release);
                trace!(target: "spark_future::shared", "OnlyResult -> Done");
                self.do_callback(KeepAlive::empty(), state);
            }
            // 转发时结果尚未写入目标，目标上的回调一律不得就地运行。
            CoreState::Proxy => self.proxy_callback(InlineContinuation::Forbid),
            other => protocol_violation("set_callback", other),
        }
    }

    /// 生产者把结果转发到 `target`；本调用总会释放生产者的挂接引用。
    ///
    /// `target` 的消费者挂接引用随之转移给本共享状态。
    pub fn set_proxy(self: &Arc<Self>, target: Arc<Self>) {
        let mut state = self.state();
        if !state.is_in(START | CoreState::AWAITING_RESULT) || Arc::ptr_eq(self, &target) {
            protocol_violation("set_proxy", state);
        }
        *self.payload.lock() = Payload::Proxy(target);

        if state == CoreState::Start {
            match self.transition(CoreState::Start, CoreState::Proxy) {
                Ok(()) => {
                    trace!(target: "spark_future::shared", "Start -> Proxy");
                    self.detach_one();
                    return;
                }
                Err(observed) => state = observed,
            }
            if !state.is_in(CoreState::AWAITING_RESULT) {
                protocol_violation("set_proxy", state);
            }
        }

        self.proxy_callback(InlineContinuation::from_awaiting(state));
        self.detach_one();
    }

    pub fn detach_future(&self) {
        self.detach_one();
    }

    /// 生产者释放挂接引用；要求结果已写入。
    pub fn detach_promise(&self) {
        let state = self.state();
        if !state.is_in(CoreState::RESULT_READABLE) {
            protocol_violation("detach_promise", state);
        }
        self.detach_one();
    }

    /// 消费者发出中断；结果已存在或已有中断时为空操作。
    pub fn raise(&self, payload: FutureError) {
        if self.interrupt.raise(payload, || self.has_result()) {
            trace!(target: "spark_future::shared", "interrupt raised");
        }
    }

    /// 生产者登记中断处理器；已存在中断时立即以该中断调用处理器。
    pub fn set_interrupt_handler<F>(&self, handler: F)
    where
        F: Fn(&FutureError) + Send + Sync + 'static,
    {
        self.interrupt
            .set_handler(Arc::new(handler), || self.has_result());
    }

    pub fn interrupt_handler(&self) -> Option<InterruptHandler> {
        self.interrupt.handler()
    }

    pub fn interrupt(&self) -> Option<FutureError> {
        self.interrupt.interrupt()
    }

    fn transition(&self, from: CoreState, to: CoreState) -> Result<(), CoreState> {
        self.state
            .compare_exchange(from.bits(), to.bits(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(CoreState::from_bits)
    }

    fn proxy_target(&self) -> Option<Arc<Self>> {
        match &*self.payload.lock() {
            Payload::Proxy(target) => Some(Arc::clone(target)),
            _ => None,
        }
    }

    fn do_callback(self: &Arc<Self>, completing: KeepAlive, prior: CoreState) {
        let executor = mem::take(&mut *self.executor.lock());

        if executor.is_inline() {
            self.attached.fetch_add(1, Ordering::Relaxed);
            let _attached = AttachedReference::new(self);
            self.invoke_callback(completing);
            return;
        }

        let completing = if prior == CoreState::OnlyCallbackAllowInline {
            completing
        } else {
            KeepAlive::empty()
        };

        self.attached.fetch_add(2, Ordering::Relaxed);
        self.callback_refs.fetch_add(2, Ordering::Relaxed);
        let local = CallbackReference::new(Arc::clone(self));
        let remote = CallbackReference::new(Arc::clone(self));
        let work: KeepAliveTask = Box::new(move |keep_alive| {
            let reference = remote;
            reference.core().invoke_callback(keep_alive);
        });

        // 延迟执行器可能在绑定时才拒绝工作项，此时 work 连同 remote 已被丢弃，
        // 需要另一份回调引用把拒绝送达消费者。
        let on_late_reject = executor.deferred().is_some().then(|| {
            self.attached.fetch_add(1, Ordering::Relaxed);
            self.callback_refs.fetch_add(1, Ordering::Relaxed);
            let reference = CallbackReference::new(Arc::clone(self));
            Box::new(move |error: ExecutorError| reference.core().deliver_rejection(error))
                as RejectHook
        });

        if let Err(error) = executor.dispatch(completing, work, on_late_reject) {
            self.deliver_rejection(error);
        }
        drop(local);
    }

    fn deliver_rejection(&self, error: ExecutorError) {
        warn!(target: "spark_future::shared", %error, "executor rejected continuation, delivering error inline");
        *self.payload.lock() = Payload::Result(Err(FutureError::ExecutorRejected(error)));
        self.invoke_callback(KeepAlive::empty());
    }

    fn invoke_callback(&self, keep_alive: KeepAlive) {
        let Some(CallbackSlot { callback, context }) = self.callback.lock().take() else {
            return;
        };
        let result = match mem::replace(&mut *self.payload.lock(), Payload::Vacant) {
            Payload::Result(result) => result,
            _ => protocol_violation("invoke_callback", self.state()),
        };
        let _scope = RequestContext::enter(context);
        callback(keep_alive, result);
    }

    fn proxy_callback(&self, allow_inline: InlineContinuation) {
        self.state.store(CoreState::Empty.bits(), Ordering::Release);
        let payload = mem::replace(&mut *self.payload.lock(), Payload::Vacant);
        let Payload::Proxy(target) = payload else {
            protocol_violation("proxy_callback", CoreState::Empty);
        };
        let executor = mem::take(&mut *self.executor.lock());
        let Some(slot) = self.callback.lock().take() else {
            protocol_violation("proxy_callback", CoreState::Empty);
        };
        trace!(target: "spark_future::shared", "forwarding callback to proxy target");
        target.set_executor(executor);
        target.install_callback(slot, allow_inline);
        target.detach_future();
    }

    pub(crate) fn deref_callback(&self) {
        if self.callback_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            let released = self.callback.lock().take();
            drop(released);
        }
    }

    pub(crate) fn detach_one(&self) {
        match self.attached.fetch_sub(1, Ordering::AcqRel) {
            0 => protocol_violation("detach", self.state()),
            1 => self.teardown(),
            _ => {}
        }
    }

    fn teardown(&self) {
        let state = self.state();
        match state {
            CoreState::OnlyResult | CoreState::Done => {
                let payload = mem::replace(&mut *self.payload.lock(), Payload::Vacant);
                drop(payload);
            }
            CoreState::Proxy => {
                let payload = mem::replace(&mut *self.payload.lock(), Payload::Vacant);
                if let Payload::Proxy(target) = payload {
                    target.detach_future();
                }
            }
            CoreState::Empty => {}
            other => protocol_violation("teardown", other),
        }
        let executor = mem::take(&mut *self.executor.lock());
        let callback = self.callback.lock().take();
        drop((executor, callback));
        self.interrupt.clear();
        trace!(target: "spark_future::shared", ?state, "shared state torn down");
    }
}

impl<T> fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.state.load(Ordering::Acquire);
        f.debug_struct("SharedState")
            .field("state", &CoreState::from_bits(raw))
            .field("attached", &self.attached.load(Ordering::Acquire))
            .field("callback_refs", &self.callback_refs.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cold]
#[track_caller]
pub(crate) fn protocol_violation(operation: &'static str, state: CoreState) -> ! {
    tracing::error!(target: "spark_future::shared", operation, ?state, "shared state protocol violation");
    panic!("shared state protocol violation: `{operation}` in state {state:?}");
}
