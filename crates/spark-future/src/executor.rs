//! # 执行器契约
//!
//! ## 契约声明
//! * **对象安全：** [`Executor`] 只有一个必需方法 `add`，共享状态通过 `Arc<dyn Executor>` 持有执行器，
//!   不关心其背后是线程池、事件循环还是测试替身。
//! * **身份比较：** 共享状态需要判断“完成方所在执行器”与“回调绑定执行器”是否为同一个，
//!   该比较以句柄指针相等为准（[`KeepAlive::ptr_eq`]），不比较执行器的内部状态。
//! * **拒绝语义：** `add` 返回 `Err` 时任务必须未被执行且已被丢弃，调用方据此走降级路径。

use std::{borrow::Cow, fmt, sync::Arc};

use thiserror::Error;

/// 提交给执行器的无参任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 需要知道自身运行在哪个执行器上的任务，执行时会收到该执行器的 [`KeepAlive`]。
pub type KeepAliveTask = Box<dyn FnOnce(KeepAlive) + Send + 'static>;

/// 执行器提交失败的原因。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// 执行器明确拒绝（队列已满、已关闭等）。
    #[error("executor `{executor}` rejected task: {reason}")]
    Rejected {
        executor: Cow<'static, str>,
        reason: Cow<'static, str>,
    },
    /// 通过空 [`KeepAlive`] 提交任务。
    #[error("no executor bound to keep-alive handle")]
    Unbound,
}

impl ExecutorError {
    pub fn rejected(
        executor: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::Rejected {
            executor: executor.into(),
            reason: reason.into(),
        }
    }
}

/// `Executor` 定义回调投递的最小契约。
///
/// # 设计背景（Why）
/// - 共享状态只需要“把一个闭包交出去”这一能力，不需要 join 句柄或取消令牌；
/// - 保持单方法 trait，使测试替身（手动队列、拒绝执行器）可以在几行内实现。
///
/// # 契约说明（What）
/// - `add` 可在任意线程调用，执行器可在任意线程、任意时刻运行任务；
/// - 返回 `Ok(())` 表示任务最终会被运行或在执行器销毁时被丢弃；
/// - 返回 `Err` 表示任务未被运行，所有权已随调用一起释放。
pub trait Executor: Send + Sync + 'static {
    fn add(&self, task: Task) -> Result<(), ExecutorError>;

    /// 诊断用名称，默认取实现类型名。
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(core::any::type_name::<Self>())
    }
}

/// 执行器保活句柄；空句柄表示“没有执行器”。
///
/// 克隆句柄即延长执行器生命周期，相当于对执行器的一次 keep-alive 引用。
#[derive(Clone, Default)]
pub struct KeepAlive {
    inner: Option<Arc<dyn Executor>>,
}

impl KeepAlive {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Some(executor),
        }
    }

    /// 以具体执行器构造句柄。
    pub fn of<E: Executor>(executor: E) -> Self {
        Self::new(Arc::new(executor))
    }

    pub const fn empty() -> Self {
        Self { inner: None }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.inner.as_ref()
    }

    /// 身份比较：两个句柄指向同一执行器实例时返回 `true`；任一方为空时返回 `false`。
    pub fn ptr_eq(&self, other: &KeepAlive) -> bool {
        match (&self.inner, &other.inner) {
            (Some(lhs), Some(rhs)) => {
                Arc::as_ptr(lhs) as *const () == Arc::as_ptr(rhs) as *const ()
            }
            _ => false,
        }
    }

    /// 提交任务，任务运行时会收到本句柄的一个副本。
    pub fn add(&self, task: KeepAliveTask) -> Result<(), ExecutorError> {
        let executor = self.inner.as_ref().ok_or(ExecutorError::Unbound)?;
        let keep_alive = self.clone();
        executor.add(Box::new(move || task(keep_alive)))
    }

    pub fn name(&self) -> Cow<'static, str> {
        match &self.inner {
            Some(executor) => executor.name(),
            None => Cow::Borrowed("<none>"),
        }
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeepAlive").field(&self.name()).finish()
    }
}

/// 在调用线程上立即运行任务的执行器。
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn add(&self, task: Task) -> Result<(), ExecutorError> {
        task();
        Ok(())
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("inline")
    }
}
