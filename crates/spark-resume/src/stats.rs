//! 续传缓冲占用的观测钩子。
//!
//! 通知是“发出即忘”的：实现不得阻塞，也不能影响日志的控制流。

use std::sync::atomic::{AtomicI64, Ordering};

/// 续传缓冲变化的观测接口。
pub trait ResumeStats: Send + Sync {
    /// 缓冲中帧数与字节数的增量，淘汰时为负。
    fn resume_buffer_changed(&self, frames_delta: i64, bytes_delta: i64);
}

/// 丢弃所有通知。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResumeStats;

impl ResumeStats for NoopResumeStats {
    fn resume_buffer_changed(&self, _frames_delta: i64, _bytes_delta: i64) {}
}

/// 以原子量累计当前占用的仪表。
#[derive(Debug, Default)]
pub struct ResumeBufferGauge {
    frames: AtomicI64,
    bytes: AtomicI64,
    notifications: AtomicI64,
}

impl ResumeBufferGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> i64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> i64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// 收到的通知次数。
    pub fn notifications(&self) -> i64 {
        self.notifications.load(Ordering::Acquire)
    }
}

impl ResumeStats for ResumeBufferGauge {
    fn resume_buffer_changed(&self, frames_delta: i64, bytes_delta: i64) {
        self.frames.fetch_add(frames_delta, Ordering::AcqRel);
        self.bytes.fetch_add(bytes_delta, Ordering::AcqRel);
        self.notifications.fetch_add(1, Ordering::AcqRel);
    }
}
