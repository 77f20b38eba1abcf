//! # ResumeLog：热续传日志
//!
//! ## 角色定位（Why）
//! - 连接中断后，对端只需要它尚未确认的帧；本日志按发送位置保存已发出的帧，
//!   重连时从对端声明的位置开始原样重放；
//! - 内存占用以字节容量约束，超过容量时从最旧的帧开始淘汰。
//!
//! ## 位置模型（How）
//! - `first`：最旧保留帧的起始位置，日志为空时等于 `last`；
//! - `last`：下一帧将要占用的位置，每发送一帧参与续传的帧就前进帧长；
//! - `implied`：已接收的参与续传帧的累计长度，只计数不存储。
//!
//! ## 契约（What）
//! - 任一变更操作完成后 `retained_bytes <= capacity_bytes`，帧按位置严格递增，
//!   非空时队首位置等于 `first`；
//! - 单帧超过整体容量时清空日志，该帧不可重放，两端位置一同前进；
//! - [`ResumeLog::send_frames_from_position`] 的前置条件是位置可用，违反时 panic。
//!
//! 日志不带内部锁，调用方需自行串行化访问（通常限定在单个事件循环线程）。

use std::{collections::VecDeque, fmt, sync::Arc};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::{
    config::{DEFAULT_CAPACITY_BYTES, ResumeSettings},
    error::ConfigError,
    frame::{FrameClassifier, FrameType, ResumePosition, RsocketFrameClassifier, StreamId},
    stats::{NoopResumeStats, ResumeStats},
    transport::FrameSink,
};

const TARGET: &str = "spark_resume::log";

pub struct ResumeLog {
    frames: VecDeque<(ResumePosition, Bytes)>,
    first: ResumePosition,
    last: ResumePosition,
    implied: ResumePosition,
    capacity_bytes: usize,
    retained_bytes: usize,
    classifier: Arc<dyn FrameClassifier>,
    stats: Arc<dyn ResumeStats>,
}

impl ResumeLog {
    /// 以给定容量创建空日志。
    ///
    /// # Panics
    /// 容量为 0 时 panic；需要可恢复的校验请使用 [`ResumeLog::with_settings`]。
    pub fn new(capacity_bytes: usize) -> Self {
        assert!(capacity_bytes > 0, "resume buffer capacity must be greater than zero");
        Self {
            frames: VecDeque::new(),
            first: 0,
            last: 0,
            implied: 0,
            capacity_bytes,
            retained_bytes: 0,
            classifier: Arc::new(RsocketFrameClassifier),
            stats: Arc::new(NoopResumeStats),
        }
    }

    pub fn with_settings(settings: &ResumeSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self::new(settings.capacity_bytes))
    }

    pub fn with_stats(mut self, stats: Arc<dyn ResumeStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FrameClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// 记录一帧已发送的帧。
    ///
    /// 不参与续传的帧类型不改变任何位置。`stream_id` 与 `consumer_allowance`
    /// 仅供冷续传使用，热日志忽略它们。
    pub fn track_sent_frame(
        &mut self,
        frame: &Bytes,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    ) {
        if !self.classifier.should_track(frame_type) {
            return;
        }
        let frame_len = frame.len();
        if frame_len == 0 {
            // 空帧不占位置，登记会产生重复的起点。
            return;
        }
        trace!(
            target: TARGET,
            %frame_type,
            stream_id,
            consumer_allowance,
            frame_len,
            position = self.last,
            "tracking sent frame"
        );

        if frame_len > self.capacity_bytes {
            warn!(
                target: TARGET,
                frame_len,
                capacity_bytes = self.capacity_bytes,
                "frame exceeds resume buffer capacity, dropping retained frames"
            );
            self.reset_up_to_position(self.last);
            self.last = advance(self.last, frame_len, "last sent");
            self.first = self.last;
            return;
        }

        while self.retained_bytes + frame_len > self.capacity_bytes && !self.frames.is_empty() {
            self.evict_frame();
        }
        self.frames.push_back((self.last, frame.clone()));
        self.retained_bytes += frame_len;
        self.stats.resume_buffer_changed(1, frame_len as i64);
        self.last = advance(self.last, frame_len, "last sent");
    }

    /// 记录一帧已接收的帧，仅推进 `implied` 位置。
    pub fn track_received_frame(
        &mut self,
        frame_len: usize,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    ) {
        if !self.classifier.should_track(frame_type) {
            return;
        }
        trace!(
            target: TARGET,
            %frame_type,
            stream_id,
            consumer_allowance,
            frame_len,
            "tracking received frame"
        );
        self.implied = advance(self.implied, frame_len, "implied");
    }

    /// 丢弃起始位置早于 `position` 的帧。
    ///
    /// `position` 不超过 `first` 时无操作，超过 `last` 时按 `last` 处理。
    /// 完成后 `first` 为剩余队首帧的位置，日志清空时等于 `last`。
    pub fn reset_up_to_position(&mut self, position: ResumePosition) {
        if position <= self.first {
            return;
        }
        let position = position.min(self.last);
        let end = self.frames.partition_point(|(start, _)| *start < position);
        if end > 0 {
            let freed: usize = self.frames.drain(..end).map(|(_, frame)| frame.len()).sum();
            self.retained_bytes -= freed;
            self.stats.resume_buffer_changed(-(end as i64), -(freed as i64));
            debug!(
                target: TARGET,
                position,
                evicted_frames = end,
                evicted_bytes = freed,
                "released resume frames"
            );
        }
        self.first = self.frames.front().map_or(self.last, |(start, _)| *start);
    }

    /// 位置等于 `last`（无待重放数据）或恰好是某个保留帧的起点时可用。
    pub fn is_position_available(&self, position: ResumePosition) -> bool {
        position == self.last
            || self
                .frames
                .binary_search_by_key(&position, |(start, _)| *start)
                .is_ok()
    }

    /// 从 `position` 起按序重放保留帧，返回重放的帧数；日志本身不变。
    ///
    /// # Panics
    /// `position` 不可用时 panic，调用方必须先以 [`ResumeLog::is_position_available`] 校验。
    pub fn send_frames_from_position<S: FrameSink + ?Sized>(
        &self,
        position: ResumePosition,
        sink: &mut S,
    ) -> usize {
        if position == self.last {
            trace!(target: TARGET, position, "idle resume, nothing to replay");
            return 0;
        }
        let Ok(start) = self
            .frames
            .binary_search_by_key(&position, |(start, _)| *start)
        else {
            tracing::error!(
                target: TARGET,
                position,
                first = self.first,
                last = self.last,
                "replay requested from unavailable position"
            );
            panic!(
                "resume position {position} is not available (retained range {}..={})",
                self.first, self.last
            );
        };
        let mut replayed = 0;
        for (_, frame) in self.frames.range(start..) {
            sink.output_frame(frame.clone());
            replayed += 1;
        }
        debug!(target: TARGET, position, replayed, "replayed resume frames");
        replayed
    }

    pub fn first_sent_position(&self) -> ResumePosition {
        self.first
    }

    pub fn last_sent_position(&self) -> ResumePosition {
        self.last
    }

    pub fn implied_position(&self) -> ResumePosition {
        self.implied
    }

    pub fn retained_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// 保留帧的起始位置，按升序。
    pub fn positions(&self) -> impl Iterator<Item = ResumePosition> + '_ {
        self.frames.iter().map(|(start, _)| *start)
    }

    pub(crate) fn frames(&self) -> impl Iterator<Item = (ResumePosition, &Bytes)> + '_ {
        self.frames.iter().map(|(start, frame)| (*start, frame))
    }

    /// 以持久化的位置与帧重建日志，超出当前容量的旧帧随即淘汰。
    ///
    /// 调用方负责保证帧按位置递增且落在 `last` 之前。
    pub(crate) fn restore(
        &mut self,
        last: ResumePosition,
        implied: ResumePosition,
        frames: Vec<(ResumePosition, Bytes)>,
    ) {
        self.clear_frames();
        self.last = last;
        self.implied = implied;
        for (start, frame) in frames {
            self.retained_bytes += frame.len();
            self.stats.resume_buffer_changed(1, frame.len() as i64);
            self.frames.push_back((start, frame));
        }
        while self.retained_bytes > self.capacity_bytes {
            self.evict_frame();
        }
        self.first = self.frames.front().map_or(self.last, |(start, _)| *start);
    }

    /// 淘汰队首帧：边界取第二帧的位置，只剩一帧时取 `last`。
    fn evict_frame(&mut self) {
        let boundary = self
            .frames
            .get(1)
            .map_or(self.last, |(start, _)| *start);
        self.reset_up_to_position(boundary);
    }

    fn clear_frames(&mut self) {
        if self.frames.is_empty() {
            return;
        }
        let count = self.frames.len() as i64;
        self.frames.clear();
        self.stats
            .resume_buffer_changed(-count, -(self.retained_bytes as i64));
        self.retained_bytes = 0;
    }
}

impl Default for ResumeLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

impl Drop for ResumeLog {
    fn drop(&mut self) {
        self.clear_frames();
    }
}

impl fmt::Debug for ResumeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeLog")
            .field("first", &self.first)
            .field("last", &self.last)
            .field("implied", &self.implied)
            .field("frames", &self.frames.len())
            .field("retained_bytes", &self.retained_bytes)
            .field("capacity_bytes", &self.capacity_bytes)
            .finish()
    }
}

/// 推进位置；越过 `u64::MAX` 后位置不再单调，连接无法继续续传。
fn advance(position: ResumePosition, frame_len: usize, which: &'static str) -> ResumePosition {
    match position.checked_add(frame_len as u64) {
        Some(next) => next,
        None => position_overflow(which, position, frame_len),
    }
}

#[cold]
#[track_caller]
fn position_overflow(which: &'static str, position: ResumePosition, frame_len: usize) -> ! {
    tracing::error!(target: TARGET, which, position, frame_len, "resume position overflow");
    panic!("{which} resume position overflow: {position} + {frame_len}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ResumeBufferGauge;
    use tracing_test::traced_test;

    fn frame(len: usize) -> Bytes {
        Bytes::from(vec![0xAB; len])
    }

    fn send(log: &mut ResumeLog, len: usize) {
        log.track_sent_frame(&frame(len), FrameType::Payload, 1, 0);
    }

    #[test]
    fn oldest_frame_is_evicted_when_capacity_is_exceeded() {
        let mut log = ResumeLog::new(100);
        send(&mut log, 40);
        send(&mut log, 40);
        send(&mut log, 40);

        assert_eq!(log.last_sent_position(), 120);
        assert_eq!(log.first_sent_position(), 40);
        assert_eq!(log.retained_bytes(), 80);
        assert_eq!(log.positions().collect::<Vec<_>>(), vec![40, 80]);
        assert!(!log.is_position_available(0));
        assert!(log.is_position_available(40));
        assert!(log.is_position_available(80));
        assert!(!log.is_position_available(60));
    }

    #[test]
    fn last_position_is_always_available() {
        let log = ResumeLog::new(100);
        assert!(log.is_position_available(0));
        assert_eq!(log.send_frames_from_position(0, &mut Vec::new()), 0);
    }

    #[traced_test]
    #[test]
    fn oversized_frame_empties_the_log() {
        let gauge = Arc::new(ResumeBufferGauge::new());
        let mut log = ResumeLog::new(100).with_stats(gauge.clone());
        send(&mut log, 30);
        send(&mut log, 150);

        assert_eq!(log.retained_frames(), 0);
        assert_eq!(log.retained_bytes(), 0);
        assert_eq!(log.first_sent_position(), 180);
        assert_eq!(log.last_sent_position(), 180);
        assert_eq!(gauge.frames(), 0);
        assert_eq!(gauge.bytes(), 0);
        assert!(logs_contain("frame exceeds resume buffer capacity"));
    }

    #[test]
    fn reset_beyond_last_clamps_and_empties() {
        let mut log = ResumeLog::new(100);
        send(&mut log, 10);
        send(&mut log, 20);
        log.reset_up_to_position(1_000);

        assert_eq!(log.retained_frames(), 0);
        assert_eq!(log.first_sent_position(), 30);
        assert_eq!(log.last_sent_position(), 30);
        assert!(log.is_position_available(30));
    }

    #[test]
    fn reset_at_or_before_first_is_a_no_op() {
        let mut log = ResumeLog::new(100);
        send(&mut log, 10);
        send(&mut log, 10);
        log.reset_up_to_position(10);
        assert_eq!(log.first_sent_position(), 10);
        log.reset_up_to_position(5);
        assert_eq!(log.first_sent_position(), 10);
        assert_eq!(log.retained_frames(), 1);
    }

    #[test]
    fn replay_is_ordered_and_leaves_the_log_untouched() {
        let mut log = ResumeLog::new(100);
        for len in [5, 6, 7] {
            send(&mut log, len);
        }
        let mut sink = Vec::new();
        assert_eq!(log.send_frames_from_position(5, &mut sink), 2);
        assert_eq!(sink.iter().map(Bytes::len).collect::<Vec<_>>(), vec![6, 7]);
        assert_eq!(log.retained_frames(), 3);
        assert_eq!(log.first_sent_position(), 0);
    }

    #[test]
    #[should_panic(expected = "resume position 3 is not available")]
    fn replay_from_unavailable_position_panics() {
        let mut log = ResumeLog::new(100);
        send(&mut log, 10);
        log.send_frames_from_position(3, &mut Vec::new());
    }

    #[traced_test]
    #[test]
    #[should_panic(expected = "last sent resume position overflow")]
    fn sent_position_overflow_is_fatal() {
        let mut log = ResumeLog::new(100);
        log.restore(u64::MAX - 1, 0, Vec::new());
        assert_eq!(log.first_sent_position(), u64::MAX - 1);
        send(&mut log, 4);
    }

    #[test]
    #[should_panic(expected = "implied resume position overflow")]
    fn implied_position_overflow_is_fatal() {
        let mut log = ResumeLog::new(100);
        log.restore(0, u64::MAX, Vec::new());
        log.track_received_frame(1, FrameType::Payload, 1, 0);
    }

    #[test]
    fn untracked_frames_do_not_move_positions() {
        let mut log = ResumeLog::new(100);
        log.track_sent_frame(&frame(12), FrameType::Keepalive, 0, 0);
        log.track_sent_frame(&frame(12), FrameType::Setup, 0, 0);
        log.track_received_frame(12, FrameType::Lease, 0, 0);
        assert_eq!(log.last_sent_position(), 0);
        assert_eq!(log.implied_position(), 0);

        log.track_received_frame(12, FrameType::RequestN, 3, 8);
        log.track_received_frame(4, FrameType::Payload, 3, 7);
        assert_eq!(log.implied_position(), 16);
    }

    #[test]
    fn stats_follow_additions_evictions_and_drop() {
        let gauge = Arc::new(ResumeBufferGauge::new());
        {
            let mut log = ResumeLog::new(50).with_stats(gauge.clone());
            send(&mut log, 20);
            send(&mut log, 20);
            send(&mut log, 20);
            assert_eq!(gauge.frames(), 2);
            assert_eq!(gauge.bytes(), 40);
        }
        assert_eq!(gauge.frames(), 0);
        assert_eq!(gauge.bytes(), 0);
    }

    #[test]
    fn zero_capacity_settings_are_rejected() {
        let settings = ResumeSettings::with_capacity(0);
        assert_eq!(
            ResumeLog::with_settings(&settings).map(|_| ()),
            Err(ConfigError::ZeroCapacity)
        );
    }

    struct PayloadOnly;

    impl FrameClassifier for PayloadOnly {
        fn should_track(&self, frame_type: FrameType) -> bool {
            frame_type == FrameType::Payload
        }
    }

    #[test]
    fn custom_classifier_decides_what_is_tracked() {
        let mut log = ResumeLog::new(100).with_classifier(Arc::new(PayloadOnly));
        log.track_sent_frame(&frame(10), FrameType::RequestN, 1, 0);
        log.track_sent_frame(&frame(10), FrameType::Payload, 1, 0);
        assert_eq!(log.last_sent_position(), 10);
        assert_eq!(log.retained_frames(), 1);
    }
}
