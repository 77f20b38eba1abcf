use std::fmt;

use crate::{
    deferred::{DeferredHandle, RejectHook},
    executor::{ExecutorError, KeepAlive, KeepAliveTask},
};

/// 回调绑定的执行器：无执行器、普通执行器或延迟执行器。
#[derive(Default)]
pub enum BoundExecutor {
    /// 回调在完成方线程上就地运行。
    #[default]
    Inline,
    Executor(KeepAlive),
    Deferred(DeferredHandle),
}

impl BoundExecutor {
    pub fn is_inline(&self) -> bool {
        match self {
            Self::Inline => true,
            Self::Executor(keep_alive) => keep_alive.is_empty(),
            Self::Deferred(_) => false,
        }
    }

    pub fn keep_alive(&self) -> Option<&KeepAlive> {
        match self {
            Self::Executor(keep_alive) if !keep_alive.is_empty() => Some(keep_alive),
            _ => None,
        }
    }

    pub fn deferred(&self) -> Option<&DeferredHandle> {
        match self {
            Self::Deferred(handle) => Some(handle),
            _ => None,
        }
    }

    /// 投递工作项：延迟执行器走 `add_from`；普通执行器与完成方相同时就地运行，否则提交。
    ///
    /// `on_late_reject` 只对延迟执行器有意义，见 [`DeferredHandle::add_from_with_fallback`]。
    pub(crate) fn dispatch(
        self,
        completing: KeepAlive,
        work: KeepAliveTask,
        on_late_reject: Option<RejectHook>,
    ) -> Result<(), ExecutorError> {
        match self {
            Self::Deferred(handle) => match on_late_reject {
                Some(on_reject) => handle.add_from_with_fallback(completing, work, on_reject),
                None => handle.add_from(completing, work),
            },
            Self::Executor(keep_alive) if completing.ptr_eq(&keep_alive) => {
                work(completing);
                Ok(())
            }
            Self::Executor(keep_alive) => keep_alive.add(work),
            Self::Inline => {
                work(completing);
                Ok(())
            }
        }
    }
}

impl From<KeepAlive> for BoundExecutor {
    fn from(keep_alive: KeepAlive) -> Self {
        if keep_alive.is_empty() {
            Self::Inline
        } else {
            Self::Executor(keep_alive)
        }
    }
}

impl From<DeferredHandle> for BoundExecutor {
    fn from(handle: DeferredHandle) -> Self {
        Self::Deferred(handle)
    }
}

impl fmt::Debug for BoundExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("Inline"),
            Self::Executor(keep_alive) => f.debug_tuple("Executor").field(keep_alive).finish(),
            Self::Deferred(handle) => f.debug_tuple("Deferred").field(handle).finish(),
        }
    }
}
