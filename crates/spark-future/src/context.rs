//! 请求上下文传播。
//!
//! # 设计背景（Why）
//! - 回调可能在另一个线程、另一个执行器上运行，但仍需看到注册回调时所处的请求上下文
//!   （租户、追踪标识等）；
//! - 因此共享状态在 `set_callback` 时捕获上下文，在回调运行期间把它安装为线程当前上下文，
//!   运行结束后恢复原值。
//!
//! # 契约说明（What）
//! - [`RequestContext::current`] 读取当前线程的上下文；
//! - [`RequestContext::enter`] 返回作用域守卫，守卫析构时恢复进入前的上下文，可安全嵌套；
//! - 上下文内容只读，写入需构造新的上下文。

use std::{
    any::Any,
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    sync::Arc,
};

use crate::sync::thread_local;

thread_local! {
    static CURRENT: RefCell<Option<RequestContext>> = RefCell::new(None);
}

type Value = Arc<dyn Any + Send + Sync>;

/// 不可变的请求上下文，克隆代价为一次引用计数。
#[derive(Clone, Default)]
pub struct RequestContext {
    values: Arc<BTreeMap<&'static str, Value>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回附加了 `key = value` 的新上下文，原上下文不变。
    pub fn with_value<V>(&self, key: &'static str, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        let mut values = (*self.values).clone();
        values.insert(key, Arc::new(value));
        Self {
            values: Arc::new(values),
        }
    }

    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<&V> {
        self.values.get(key)?.downcast_ref::<V>()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn same_context(&self, other: &RequestContext) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }

    /// 当前线程安装的上下文。
    pub fn current() -> Option<RequestContext> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// 把 `context` 安装为当前上下文（`None` 表示清空），直到返回的守卫析构。
    pub fn enter(context: Option<RequestContext>) -> ContextScope {
        let previous = CURRENT.with(|current| current.replace(context));
        ContextScope {
            previous: Some(previous),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// [`RequestContext::enter`] 返回的作用域守卫。
#[must_use = "上下文仅在守卫存活期间生效"]
pub struct ContextScope {
    previous: Option<Option<RequestContext>>,
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // 线程退出阶段 TLS 可能已被销毁，此时无需恢复。
            let _ = CURRENT.try_with(|current| current.replace(previous));
        }
    }
}
