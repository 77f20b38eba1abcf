//! 帧模型：帧类型、流标识与续传位置。
//!
//! # 设计背景（Why）
//! - 续传日志不解析帧内容，只需要“这是哪类帧、属于哪个流、多长”三项信息；
//! - 帧类型决定帧是否参与续传：连接级握手与保活帧在重连后会重新协商，重放它们没有意义。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 逻辑帧流中的字节偏移，单调递增。
pub type ResumePosition = u64;

/// 流标识，0 保留给连接级帧。
pub type StreamId = u32;

/// RSocket 1.0 帧类型编码。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    Reserved = 0x00,
    Setup = 0x01,
    Lease = 0x02,
    Keepalive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
    Resume = 0x0D,
    ResumeOk = 0x0E,
    Ext = 0x3F,
}

impl FrameType {
    /// 由线上编码还原帧类型；未知编码归为 [`FrameType::Reserved`]。
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => Self::Setup,
            0x02 => Self::Lease,
            0x03 => Self::Keepalive,
            0x04 => Self::RequestResponse,
            0x05 => Self::RequestFnf,
            0x06 => Self::RequestStream,
            0x07 => Self::RequestChannel,
            0x08 => Self::RequestN,
            0x09 => Self::Cancel,
            0x0A => Self::Payload,
            0x0B => Self::Error,
            0x0C => Self::MetadataPush,
            0x0D => Self::Resume,
            0x0E => Self::ResumeOk,
            0x3F => Self::Ext,
            _ => Self::Reserved,
        }
    }

    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// 流级请求、流控与数据帧参与续传；握手、租约、保活、元数据推送与扩展帧不参与。
    pub const fn is_resumable(self) -> bool {
        matches!(
            self,
            Self::RequestChannel
                | Self::RequestStream
                | Self::RequestResponse
                | Self::RequestFnf
                | Self::RequestN
                | Self::Cancel
                | Self::Error
                | Self::Payload
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reserved => "RESERVED",
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Resume => "RESUME",
            Self::ResumeOk => "RESUME_OK",
            Self::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// 判定帧类型是否参与续传的谓词。
pub trait FrameClassifier: Send + Sync {
    fn should_track(&self, frame_type: FrameType) -> bool;
}

/// 按 RSocket 1.0 语义分类的默认实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct RsocketFrameClassifier;

impl FrameClassifier for RsocketFrameClassifier {
    fn should_track(&self, frame_type: FrameType) -> bool {
        frame_type.is_resumable()
    }
}
