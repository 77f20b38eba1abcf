//! Promise / Future 句柄。
//!
//! # 设计背景（Why）
//! - [`SharedState`] 暴露的是带协议约束的底层操作；业务代码更需要“只能写一次”的 promise
//!   与“只能挂一次回调”的 future。以值语义消费句柄，可以把重复写入在编译期排除。
//!
//! # 契约说明（What）
//! - [`contract`] 创建一对共享同一状态的句柄；
//! - promise 在未写入结果时被丢弃，消费者收到 [`FutureError::BrokenPromise`]；
//! - future 被丢弃而未挂接回调时，结果仍会在生产者写入后随拆除一并释放。

use std::{fmt, sync::Arc};

use crate::{
    context::RequestContext,
    deferred::DeferredHandle,
    error::{FutureError, Try},
    executor::KeepAlive,
    shared::{BoundExecutor, InlineContinuation, SharedState},
};

/// 创建一对 promise/future。
pub fn contract<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let core = SharedState::new();
    (
        Promise {
            core: Some(Arc::clone(&core)),
        },
        Future { core: Some(core) },
    )
}

/// 生产者句柄。
pub struct Promise<T: Send + 'static> {
    core: Option<Arc<SharedState<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    pub fn set_value(self, value: T) {
        self.set_try(Ok(value));
    }

    pub fn set_error(self, error: FutureError) {
        self.set_try(Err(error));
    }

    pub fn set_try(self, result: Try<T>) {
        self.set_try_with(KeepAlive::empty(), result);
    }

    /// 写入结果并声明生产者当前所在执行器，允许回调在同一执行器上就地运行。
    pub fn set_try_with(mut self, completing: KeepAlive, result: Try<T>) {
        if let Some(core) = self.core.take() {
            core.set_result(completing, result);
            core.detach_promise();
        }
    }

    /// 把结果转发到另一个 future：本 promise 的消费者将直接收到 `future` 的结果。
    pub fn forward_from(mut self, future: Future<T>) {
        let Some(core) = self.core.take() else {
            return;
        };
        if let Some(target) = future.into_core() {
            core.set_proxy(target);
        } else {
            core.set_result(KeepAlive::empty(), Err(FutureError::BrokenPromise));
            core.detach_promise();
        }
    }

    pub fn set_interrupt_handler<F>(&self, handler: F)
    where
        F: Fn(&FutureError) + Send + Sync + 'static,
    {
        if let Some(core) = &self.core {
            core.set_interrupt_handler(handler);
        }
    }

    /// 消费者发出的中断载荷（若有）。
    pub fn interrupt(&self) -> Option<FutureError> {
        self.core.as_ref().and_then(|core| core.interrupt())
    }

    /// 消费者是否已挂接回调。
    pub fn is_awaited(&self) -> bool {
        self.core.as_ref().is_some_and(|core| core.has_callback())
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            core.set_result(KeepAlive::empty(), Err(FutureError::BrokenPromise));
            core.detach_promise();
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("core", &self.core).finish()
    }
}

/// 消费者句柄。
pub struct Future<T: Send + 'static> {
    core: Option<Arc<SharedState<T>>>,
}

impl<T: Send + 'static> Future<T> {
    pub fn ready(value: T) -> Self {
        Self::from_try(Ok(value))
    }

    pub fn failed(error: FutureError) -> Self {
        Self::from_try(Err(error))
    }

    pub fn from_try(result: Try<T>) -> Self {
        Self {
            core: Some(SharedState::make_ready(result)),
        }
    }

    /// 指定回调运行的执行器。
    pub fn via(self, executor: KeepAlive) -> Self {
        self.bind(BoundExecutor::from(executor))
    }

    /// 让回调等待延迟执行器绑定后再运行。
    pub fn via_deferred(self, executor: DeferredHandle) -> Self {
        self.bind(BoundExecutor::Deferred(executor))
    }

    fn bind(self, executor: BoundExecutor) -> Self {
        if let Some(core) = &self.core {
            core.set_executor(executor);
        }
        self
    }

    pub fn is_ready(&self) -> bool {
        self.core.as_ref().is_some_and(|core| core.has_result())
    }

    /// 借用已就绪的结果。
    pub fn with_result<R>(&self, f: impl FnOnce(&Try<T>) -> R) -> Option<R> {
        self.core.as_ref()?.with_result(f)
    }

    /// 向生产者发出中断。
    pub fn raise(&self, payload: FutureError) {
        if let Some(core) = &self.core {
            core.raise(payload);
        }
    }

    pub fn cancel(&self) {
        self.raise(FutureError::Cancelled);
    }

    /// 挂接回调；回调不允许就地运行在完成方执行器上。
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Try<T>) + Send + 'static,
    {
        self.on_complete_with(InlineContinuation::Forbid, move |_, result| callback(result));
    }

    /// 挂接回调并声明是否允许就地运行；回调收到实际运行所在执行器的句柄。
    ///
    /// 调用线程当前的 [`RequestContext`] 会随回调一起被捕获。
    pub fn on_complete_with<F>(mut self, allow_inline: InlineContinuation, callback: F)
    where
        F: FnOnce(KeepAlive, Try<T>) + Send + 'static,
    {
        if let Some(core) = self.core.take() {
            core.set_callback(callback, RequestContext::current(), allow_inline);
            core.detach_future();
        }
    }

    pub(crate) fn into_core(mut self) -> Option<Arc<SharedState<T>>> {
        self.core.take()
    }

    pub fn shared_state(&self) -> Option<&Arc<SharedState<T>>> {
        self.core.as_ref()
    }
}

impl<T: Send + 'static> Drop for Future<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            core.detach_future();
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future").field("core", &self.core).finish()
    }
}
