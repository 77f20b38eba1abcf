//! 中断通道：消费者向生产者发出的取消/中断信号。
//!
//! # 教案式说明
//! - **意图 (Why)**：中断与结果走不同方向，若与主状态机共用原子量会把两条协议耦合在一起，
//!   因此中断载荷与处理器单独存放，并由一把自旋锁保护。
//! - **契约 (What)**：
//!   - 中断载荷最多写入一次，之后的 `raise` 均为空操作；
//!   - 结果已存在时，`raise` 与 `set_handler` 均为空操作；
//!   - 每个中断最多被投递给处理器一次：要么由 `raise` 投递给已登记的处理器，
//!     要么由 `set_handler` 把已存在的中断立即投递给新处理器（此时处理器不再登记）。
//! - **执行逻辑 (How)**：锁内只做判定与槽位读写，处理器在释放锁之后调用，
//!   因此处理器内部可以再次调用 `raise` 或查询通道。
//! - **快速路径**：`handler_set` 标志在从未登记处理器时避免加锁。

use std::{fmt, sync::Arc};

use crate::{
    error::FutureError,
    sync::{AtomicBool, Ordering, SpinLock},
};

/// 中断处理器，由生产者登记，消费者触发。
pub type InterruptHandler = Arc<dyn Fn(&FutureError) + Send + Sync + 'static>;

#[derive(Default)]
struct Slots {
    interrupt: Option<FutureError>,
    handler: Option<InterruptHandler>,
}

/// 独立加锁的中断通道。
pub struct InterruptChannel {
    slots: SpinLock<Slots>,
    handler_set: AtomicBool,
}

impl InterruptChannel {
    pub fn new() -> Self {
        Self {
            slots: SpinLock::new(Slots::default()),
            handler_set: AtomicBool::new(false),
        }
    }

    /// 发出中断；`result_present` 在锁内求值。
    ///
    /// 返回 `true` 表示本次调用写入了中断载荷。
    pub fn raise(&self, payload: FutureError, result_present: impl FnOnce() -> bool) -> bool {
        let (stored, handler) = {
            let mut slots = self.slots.lock();
            if slots.interrupt.is_some() || result_present() {
                return false;
            }
            slots.interrupt = Some(payload.clone());
            (payload, slots.handler.clone())
        };
        if let Some(handler) = handler {
            handler(&stored);
        }
        true
    }

    /// 登记处理器；若中断已存在则立即以该中断调用处理器且不再登记。
    pub fn set_handler(&self, handler: InterruptHandler, result_present: impl FnOnce() -> bool) {
        let pending = {
            let mut slots = self.slots.lock();
            if result_present() {
                return;
            }
            match &slots.interrupt {
                Some(interrupt) => Some(interrupt.clone()),
                None => {
                    slots.handler = Some(Arc::clone(&handler));
                    self.handler_set.store(true, Ordering::Release);
                    None
                }
            }
        };
        if let Some(interrupt) = pending {
            handler(&interrupt);
        }
    }

    pub fn handler(&self) -> Option<InterruptHandler> {
        if !self.handler_set.load(Ordering::Acquire) {
            return None;
        }
        self.slots.lock().handler.clone()
    }

    pub fn interrupt(&self) -> Option<FutureError> {
        self.slots.lock().interrupt.clone()
    }

    pub fn has_interrupt(&self) -> bool {
        self.slots.lock().interrupt.is_some()
    }

    /// 拆除时调用：释放载荷与处理器。
    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.slots.lock());
        self.handler_set.store(false, Ordering::Release);
        drop(drained);
    }
}

impl Default for InterruptChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterruptChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("InterruptChannel")
            .field("interrupt", &slots.interrupt)
            .field("has_handler", &slots.handler.is_some())
            .finish()
    }
}
