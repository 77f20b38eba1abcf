//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 共享状态对外只交付一种结果形态 [`Try<T>`]，其错误分支需要覆盖“生产者失约”、“执行器拒绝投递”、
//!   “消费者中断”等框架级故障，以及业务侧自带的错误；
//! - 错误码遵循 `<域>.<语义>` 命名，便于日志与告警按码值聚合。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，并实现 `Clone`，因为中断载荷需要同时交给处理器与诊断查询；
//! - 任意外部错误可通过 [`FutureError::other`] 以 `Arc` 包装后跨线程共享。

use std::{borrow::Cow, error::Error as StdError, sync::Arc};

use thiserror::Error;

use crate::executor::ExecutorError;

/// 共享状态携带的结果类型：成功值或 [`FutureError`]。
pub type Try<T> = Result<T, FutureError>;

/// 稳定错误码集合。
pub mod codes {
    pub const BROKEN_PROMISE: &str = "future.broken_promise";
    pub const EXECUTOR_REJECTED: &str = "future.executor_rejected";
    pub const INTERRUPTED: &str = "future.interrupted";
    pub const CANCELLED: &str = "future.cancelled";
    pub const OTHER: &str = "future.other";
}

/// `FutureError` 是 promise/future 通道上传递的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把框架自身产生的故障与业务错误统一到同一枚举，使回调只需处理一种错误类型。
/// - **契约 (What)**：
///   - `BrokenPromise`：promise 在写入结果前被丢弃；
///   - `ExecutorRejected`：回调无法投递到绑定的执行器，消费者仍会收到恰好一次回调；
///   - `Interrupted`/`Cancelled`：通常作为 [`raise`](crate::SharedState::raise) 的中断载荷；
///   - `Failed`：业务侧以稳定码值描述的失败；
///   - `Other`：任意实现了 `std::error::Error` 的外部错误。
/// - **设计权衡 (Trade-offs)**：`Other` 采用 `Arc` 包装以满足 `Clone`，代价是一次额外的引用计数。
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum FutureError {
    #[error("promise dropped before a result was set")]
    BrokenPromise,
    #[error("continuation could not be scheduled: {0}")]
    ExecutorRejected(#[source] ExecutorError),
    #[error("future interrupted: {reason}")]
    Interrupted { reason: Cow<'static, str> },
    #[error("operation cancelled")]
    Cancelled,
    #[error("[{code}] {message}")]
    Failed {
        code: &'static str,
        message: Cow<'static, str>,
    },
    #[error(transparent)]
    Other(Arc<dyn StdError + Send + Sync + 'static>),
}

impl FutureError {
    /// 构造携带原因的中断载荷。
    pub fn interrupted(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Interrupted {
            reason: reason.into(),
        }
    }

    /// 构造业务失败，`code` 应遵循 `<域>.<语义>` 约定。
    pub fn failed(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Failed {
            code,
            message: message.into(),
        }
    }

    /// 包装任意外部错误。
    pub fn other<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Other(Arc::new(error))
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::BrokenPromise => codes::BROKEN_PROMISE,
            Self::ExecutorRejected(_) => codes::EXECUTOR_REJECTED,
            Self::Interrupted { .. } => codes::INTERRUPTED,
            Self::Cancelled => codes::CANCELLED,
            Self::Failed { code, .. } => code,
            Self::Other(_) => codes::OTHER,
        }
    }

    /// 判断错误是否源自消费者侧的中断或取消。
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::Cancelled)
    }
}

impl From<ExecutorError> for FutureError {
    fn from(error: ExecutorError) -> Self {
        Self::ExecutorRejected(error)
    }
}
