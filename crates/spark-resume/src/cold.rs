//! # ColdResumeLog：跨进程重启的续传日志
//!
//! ## 角色定位（Why）
//! - 热续传只覆盖“进程仍在、连接断开”的场景；冷续传还要在进程重启后恢复，
//!   因此除了帧日志，还需记住哪些流仍然打开、各自的消费额度与本端用过的最大流标识；
//! - 正常关闭时把上述状态写入文件，启动时读回。
//!
//! ## 契约（What）
//! - 流登记规则见 [`crate::streams`]；收发参与续传的帧时，若流仍登记在案则刷新其消费额度；
//! - 持久化先写临时文件再原子替换，避免半写入的状态文件；
//! - 读回时校验帧位置的单调性，发现不一致返回 [`ResumeError::CorruptSnapshot`]。

use std::{
    ffi::OsString,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::{
    config::ResumeSettings,
    error::{ConfigError, ResumeError},
    frame::{FrameClassifier, FrameType, ResumePosition, RsocketFrameClassifier, StreamId},
    log::ResumeLog,
    manager::ResumeManager,
    stats::ResumeStats,
    streams::{RequestOriginator, StreamRegistry, StreamResumeInfo, StreamType},
    transport::FrameSink,
};

const TARGET: &str = "spark_resume::cold";

pub struct ColdResumeLog {
    log: ResumeLog,
    streams: StreamRegistry,
    classifier: Arc<dyn FrameClassifier>,
    target: Option<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct ColdSnapshot {
    first_sent_position: ResumePosition,
    last_sent_position: ResumePosition,
    implied_position: ResumePosition,
    frames: Vec<PersistedFrame>,
    streams: StreamRegistry,
}

#[derive(Serialize, Deserialize)]
struct PersistedFrame {
    position: ResumePosition,
    data: Vec<u8>,
}

impl ColdResumeLog {
    pub fn new(log: ResumeLog) -> Self {
        Self {
            log,
            streams: StreamRegistry::new(),
            classifier: Arc::new(RsocketFrameClassifier),
            target: None,
        }
    }

    /// 按配置打开冷续传日志：状态文件存在则读回，否则从空日志开始。
    ///
    /// 配置必须给出 `cold_resume_path`，之后的 [`ColdResumeLog::persist`] 写回同一路径。
    pub fn open(settings: &ResumeSettings) -> Result<Self, ResumeError> {
        let path = settings
            .cold_resume_path
            .clone()
            .ok_or(ConfigError::MissingColdResumePath)?;
        let mut cold = if path.exists() {
            Self::load(&path, settings)?
        } else {
            debug!(target: TARGET, path = %path.display(), "no cold resume state, starting fresh");
            Self::new(ResumeLog::with_settings(settings)?)
        };
        cold.target = Some(path);
        Ok(cold)
    }

    /// 从 `path` 读回状态，帧日志按 `settings` 的容量重建。
    pub fn load(path: impl AsRef<Path>, settings: &ResumeSettings) -> Result<Self, ResumeError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ResumeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: ColdSnapshot = serde_json::from_slice(&raw)?;
        snapshot.validate()?;

        let mut log = ResumeLog::with_settings(settings)?;
        let frames: Vec<(ResumePosition, Bytes)> = snapshot
            .frames
            .into_iter()
            .map(|frame| (frame.position, Bytes::from(frame.data)))
            .collect();
        log.restore(
            snapshot.last_sent_position,
            snapshot.implied_position,
            frames,
        );
        info!(
            target: TARGET,
            path = %path.display(),
            streams = snapshot.streams.len(),
            retained_frames = log.retained_frames(),
            "loaded cold resume state"
        );
        Ok(Self {
            log,
            streams: snapshot.streams,
            classifier: Arc::new(RsocketFrameClassifier),
            target: None,
        })
    }

    pub fn with_stats(mut self, stats: Arc<dyn ResumeStats>) -> Self {
        self.log = self.log.with_stats(stats);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FrameClassifier>) -> Self {
        self.log = self.log.with_classifier(classifier.clone());
        self.classifier = classifier;
        self
    }

    /// 写回 [`ColdResumeLog::open`] 时给定的路径。
    pub fn persist(&self) -> Result<(), ResumeError> {
        match &self.target {
            Some(path) => self.save(path),
            None => Err(ConfigError::MissingColdResumePath.into()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ResumeError> {
        let path = path.as_ref();
        let snapshot = ColdSnapshot {
            first_sent_position: self.log.first_sent_position(),
            last_sent_position: self.log.last_sent_position(),
            implied_position: self.log.implied_position(),
            frames: self
                .log
                .frames()
                .map(|(position, frame)| PersistedFrame {
                    position,
                    data: frame.to_vec(),
                })
                .collect(),
            streams: self.streams.clone(),
        };
        let encoded = serde_json::to_vec(&snapshot)?;

        let mut staging = OsString::from(path.as_os_str());
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        let io_error = |source: io::Error| ResumeError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::write(&staging, &encoded).map_err(io_error)?;
        fs::rename(&staging, path).map_err(io_error)?;

        info!(
            target: TARGET,
            path = %path.display(),
            streams = self.streams.len(),
            retained_frames = self.log.retained_frames(),
            bytes = encoded.len(),
            "persisted cold resume state"
        );
        Ok(())
    }

    pub fn log(&self) -> &ResumeLog {
        &self.log
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    fn refresh_allowance(&mut self, frame_type: FrameType, stream_id: StreamId, allowance: u32) {
        if self.classifier.should_track(frame_type)
            && !self.streams.update_allowance(stream_id, allowance)
        {
            // 帧可能属于刚关闭的流。
            trace!(target: TARGET, stream_id, "allowance update for unknown stream");
        }
    }
}

impl fmt::Debug for ColdResumeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColdResumeLog")
            .field("log", &self.log)
            .field("streams", &self.streams)
            .field("target", &self.target)
            .finish()
    }
}

impl ColdSnapshot {
    fn validate(&self) -> Result<(), ResumeError> {
        let corrupt = |reason| Err(ResumeError::CorruptSnapshot { reason });
        if self.first_sent_position > self.last_sent_position {
            return corrupt("first sent position is ahead of last sent position");
        }
        let mut expected = self.first_sent_position;
        for frame in &self.frames {
            if frame.position != expected {
                return corrupt("frames are not contiguous");
            }
            expected = match expected.checked_add(frame.data.len() as u64) {
                Some(next) => next,
                None => return corrupt("position overflow"),
            };
        }
        if expected != self.last_sent_position {
            return corrupt("frames do not end at last sent position");
        }
        Ok(())
    }
}

impl ResumeManager for ColdResumeLog {
    fn track_sent_frame(
        &mut self,
        frame: &Bytes,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    ) {
        self.refresh_allowance(frame_type, stream_id, consumer_allowance);
        self.log
            .track_sent_frame(frame, frame_type, stream_id, consumer_allowance);
    }

    fn track_received_frame(
        &mut self,
        frame_len: usize,
        frame_type: FrameType,
        stream_id: StreamId,
        consumer_allowance: u32,
    ) {
        self.refresh_allowance(frame_type, stream_id, consumer_allowance);
        self.log
            .track_received_frame(frame_len, frame_type, stream_id, consumer_allowance);
    }

    fn reset_up_to_position(&mut self, position: ResumePosition) {
        self.log.reset_up_to_position(position);
    }

    fn is_position_available(&self, position: ResumePosition) -> bool {
        self.log.is_position_available(position)
    }

    fn send_frames_from_position(
        &self,
        position: ResumePosition,
        sink: &mut dyn FrameSink,
    ) -> usize {
        self.log.send_frames_from_position(position, sink)
    }

    fn first_sent_position(&self) -> ResumePosition {
        self.log.first_sent_position()
    }

    fn last_sent_position(&self) -> ResumePosition {
        self.log.last_sent_position()
    }

    fn implied_position(&self) -> ResumePosition {
        self.log.implied_position()
    }

    fn on_stream_open(
        &mut self,
        stream_id: StreamId,
        requester: RequestOriginator,
        stream_token: &str,
        stream_type: StreamType,
    ) -> Result<(), ResumeError> {
        self.streams.open(
            stream_id,
            StreamResumeInfo::new(stream_type, requester, stream_token),
        )?;
        debug!(target: TARGET, stream_id, ?requester, ?stream_type, "stream registered");
        Ok(())
    }

    fn on_stream_closed(&mut self, stream_id: StreamId) {
        if self.streams.close(stream_id).is_some() {
            debug!(target: TARGET, stream_id, "stream unregistered");
        }
    }

    fn stream_resume_infos(&self) -> &StreamRegistry {
        &self.streams
    }
}
