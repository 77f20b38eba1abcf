//! 重放帧的出口。

use bytes::Bytes;

/// 接收重放帧的传输端。
///
/// 续传日志只负责按序交出帧，是否立即写出或暂存由实现决定。
pub trait FrameSink {
    fn output_frame(&mut self, frame: Bytes);
}

impl FrameSink for Vec<Bytes> {
    fn output_frame(&mut self, frame: Bytes) {
        self.push(frame);
    }
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn output_frame(&mut self, frame: Bytes) {
        (**self).output_frame(frame);
    }
}
