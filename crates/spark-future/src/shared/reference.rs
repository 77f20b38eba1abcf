use std::sync::Arc;

use super::SharedState;

/// 回调投递期间持有的“核心 + 回调”双重引用。
///
/// 构造前调用方已为 `attached` 与 `callback_refs` 各加一；析构时先释放回调引用，
/// 再释放挂接引用。回调引用归零会丢弃尚未运行的回调，挂接引用归零触发拆除。
pub(crate) struct CallbackReference<T: Send + 'static> {
    core: Arc<SharedState<T>>,
}

impl<T: Send + 'static> CallbackReference<T> {
    pub(crate) fn new(core: Arc<SharedState<T>>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &SharedState<T> {
        &self.core
    }
}

impl<T: Send + 'static> Drop for CallbackReference<T> {
    fn drop(&mut self) {
        self.core.deref_callback();
        self.core.detach_one();
    }
}

/// 就地回调路径使用：只持有一个挂接引用，回调返回（或 panic 展开）后释放。
pub(crate) struct AttachedReference<'a, T: Send + 'static> {
    core: &'a SharedState<T>,
}

impl<'a, T: Send + 'static> AttachedReference<'a, T> {
    pub(crate) fn new(core: &'a SharedState<T>) -> Self {
        Self { core }
    }
}

impl<T: Send + 'static> Drop for AttachedReference<'_, T> {
    fn drop(&mut self) {
        self.core.detach_one();
    }
}
