//! 面向传输层的续传接口。
//!
//! 传输层对每个跨线的帧调用 `track_*`，重连握手时先校验位置再重放。
//! 冷续传相关的流登记方法带有默认的空实现，热日志无需关心。

use bytes::Bytes;

use crate::{
    error::ResumeError,
    frame::{FrameType, ResumePosition, StreamId},
    log::ResumeLog,
    streams::{RequestOriginator, StreamRegistry, StreamResumeInfo, StreamType},
    transport::FrameSink,
};

static NO_STREAMS: StreamRegistry = StreamRegistry::new();

pub trait ResumeManager: Send {
    fn track_sent_frame(
        &mut self,
        frame: &Bytes,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    );

    fn track_received_frame(
        &mut self,
        frame_len: usize,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    );

    fn reset_up_to_position(&mut self, position: ResumePosition);

    fn is_position_available(&self, position: ResumePosition) -> bool;

    /// 前置条件：`is_position_available(position)`。
    fn send_frames_from_position(
        &self,
        position: ResumePosition,
        sink: &mut dyn FrameSink,
    ) -> usize;

    fn first_sent_position(&self) -> ResumePosition;

    fn last_sent_position(&self) -> ResumePosition;

    fn implied_position(&self) -> ResumePosition;

    fn on_stream_open(
        &mut self,
        stream_id: StreamId,
        requester: RequestOriginator,
        stream_token: &str,
        stream_type: StreamType,
    ) -> Result<(), ResumeError> {
        let _ = (stream_id, requester, stream_token, stream_type);
        Ok(())
    }

    fn on_stream_closed(&mut self, stream_id: StreamId) {
        let _ = stream_id;
    }

    fn stream_resume_infos(&self) -> &StreamRegistry {
        &NO_STREAMS
    }

    fn largest_used_stream_id(&self) -> StreamId {
        self.stream_resume_infos().largest_used_stream_id()
    }

    fn stream_resume_info(&self, stream_id: StreamId) -> Option<&StreamResumeInfo> {
        self.stream_resume_infos().get(stream_id)
    }
}

impl ResumeManager for ResumeLog {
    fn track_sent_frame(
        &mut self,
        frame: &Bytes,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    ) {
        ResumeLog::track_sent_frame(self, frame, frame_type, stream_id, consumer_allowance);
    }

    fn track_received_frame(
        &mut self,
        frame_len: usize,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    ) {
        ResumeLog::track_received_frame(self, frame_len, frame_type, stream_id, consumer_allowance);
    }

    fn reset_up_to_position(&mut self, position: ResumePosition) {
        ResumeLog::reset_up_to_position(self, position);
    }

    fn is_position_available(&self, position: ResumePosition) -> bool {
        ResumeLog::is_position_available(self, position)
    }

    fn send_frames_from_position(
        &self,
        position: ResumePosition,
        sink: &mut dyn FrameSink,
    ) -> usize {
        ResumeLog::send_frames_from_position(self, position, sink)
    }

    fn first_sent_position(&self) -> ResumePosition {
        ResumeLog::first_sent_position(self)
    }

    fn last_sent_position(&self) -> ResumePosition {
        ResumeLog::last_sent_position(self)
    }

    fn implied_position(&self) -> ResumePosition {
        ResumeLog::implied_position(self)
    }
}
