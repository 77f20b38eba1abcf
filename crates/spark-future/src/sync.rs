//! 并发原语垫片：常规构建使用 `core` 原子量与 `spin` 自旋锁，`cfg(loom)` 下切换为 Loom 模型实现。
//!
//! # 设计背景（Why）
//! - 共享状态机与延迟执行器的正确性完全依赖原子序；Loom 需要接管这些原子量才能穷举交错。
//! - `spin::Mutex` 在 Loom 调度器下会无限自旋，因此模型构建改用 `loom::sync::Mutex`。
//!
//! # 契约说明（What）
//! - crate 内部只允许通过本模块引入原子量、锁与线程局部存储；
//! - `Arc` 始终来自标准库，句柄生命周期由显式计数器驱动而非 `Arc` 强引用数。

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
#[cfg(loom)]
pub(crate) use loom::thread_local;

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
#[cfg(not(loom))]
pub(crate) use std::thread_local;

/// 极简互斥锁包装，统一常规构建与 Loom 构建的 `lock()` 签名。
///
/// 临界区只做槽位的读写与 `take`。唯一例外是 `SharedState::with_result`：
/// 调用方闭包在结果槽位锁内运行，闭包内不得再次访问同一共享状态。
pub(crate) struct SpinLock<T> {
    #[cfg(not(loom))]
    inner: spin::Mutex<T>,
    #[cfg(loom)]
    inner: loom::sync::Mutex<T>,
}

#[cfg(not(loom))]
impl<T> SpinLock<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.inner.lock()
    }
}

#[cfg(loom)]
impl<T> SpinLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: loom::sync::Mutex::new(value),
        }
    }

    pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
