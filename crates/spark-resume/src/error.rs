//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 续传日志本身的前置条件违规（重放不可用位置）以 panic 表达；
//!   这里收纳的是调用方可以处理的失败：协商被拒、流登记冲突、持久化与配置错误。

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{
    frame::{ResumePosition, StreamId},
    streams::StreamType,
};

/// 续传协商、流登记与持久化的错误域。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResumeError {
    /// 对端请求的服务端位置不在日志中。
    #[error(
        "resume position {position} is not available (retained range {first_available}..={last_sent})"
    )]
    PositionUnavailable {
        position: ResumePosition,
        first_available: ResumePosition,
        last_sent: ResumePosition,
    },
    /// 对端声称已发送的位置超出本端已接收的范围。
    #[error("client position {client_position} is ahead of implied position {implied_position}")]
    ClientPositionAhead {
        client_position: ResumePosition,
        implied_position: ResumePosition,
    },
    #[error("stream {stream_id} is already tracked for cold resumption")]
    DuplicateStream { stream_id: StreamId },
    #[error("stream {stream_id} of type {stream_type:?} cannot be resumed")]
    NotResumable {
        stream_id: StreamId,
        stream_type: StreamType,
    },
    #[error("failed to access cold resume state at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("inconsistent cold resume state: {reason}")]
    CorruptSnapshot { reason: &'static str },
    #[error("malformed cold resume state: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ResumeError {
    /// 稳定错误码，遵循 `<域>.<语义>` 约定。
    pub fn code(&self) -> &'static str {
        match self {
            Self::PositionUnavailable { .. } => "resume.position_unavailable",
            Self::ClientPositionAhead { .. } => "resume.client_position_ahead",
            Self::DuplicateStream { .. } => "resume.duplicate_stream",
            Self::NotResumable { .. } => "resume.not_resumable",
            Self::Io { .. } => "resume.io",
            Self::CorruptSnapshot { .. } => "resume.corrupt_snapshot",
            Self::Serialization(_) => "resume.serialization",
            Self::Config(_) => "resume.config",
        }
    }
}

/// 续传配置错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("resume buffer capacity must be greater than zero")]
    ZeroCapacity,
    #[error("cold resumption requires `cold_resume_path`")]
    MissingColdResumePath,
    #[error("invalid resume settings: {0}")]
    Parse(String),
}
