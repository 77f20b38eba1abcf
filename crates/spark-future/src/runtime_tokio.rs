//! Tokio 执行器适配。
//!
//! # 教案式说明
//! - **意图 (Why)**：让回调直接投递到现有 Tokio 运行时，而不是另起线程池；
//! - **契约 (What)**：每个任务以 `spawn` 提交为一个独立的 Tokio 任务，任务体同步运行；
//!   运行时已关闭时任务会被 Tokio 静默丢弃，共享状态侧随之释放回调引用；
//! - **风险 (Gotchas)**：回调内执行阻塞操作会占用 Tokio 工作线程，阻塞型回调应自行 `spawn_blocking`。

use std::borrow::Cow;

use tokio::runtime::Handle;

use crate::executor::{Executor, ExecutorError, KeepAlive, Task};

/// 基于 [`tokio::runtime::Handle`] 的执行器。
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// 绑定当前线程所在的 Tokio 运行时；不在运行时上下文中时返回 [`ExecutorError::Unbound`]。
    pub fn current() -> Result<Self, ExecutorError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ExecutorError::Unbound)
    }

    pub fn keep_alive(self) -> KeepAlive {
        KeepAlive::of(self)
    }
}

impl Executor for TokioExecutor {
    fn add(&self, task: Task) -> Result<(), ExecutorError> {
        drop(self.handle.spawn(async move { task() }));
        Ok(())
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("tokio")
    }
}
