//! 冷续传所需的流登记表。
//!
//! # 契约说明（What）
//! - 每个打开的流登记一条 [`StreamResumeInfo`]，关闭后移除；
//! - fire-and-forget 请求没有可续传的后续帧，不允许登记；
//! - 本端发起的流会推高 `largest_used_stream_id`，进程重启后据此分配新的流标识，避免与旧流冲突。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::ResumeError, frame::StreamId};

/// 可登记的交互模型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    RequestResponse,
    Stream,
    Channel,
    FireAndForget,
}

/// 请求由哪一端发起。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestOriginator {
    Local,
    Remote,
}

/// 单个流在重启后恢复所需的全部信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResumeInfo {
    pub stream_type: StreamType,
    pub requester: RequestOriginator,
    /// 应用层用于重新挂接订阅者的令牌。
    pub stream_token: String,
    /// 消费者尚未用完的请求额度。
    pub consumer_allowance: u32,
}

impl StreamResumeInfo {
    pub fn new(
        stream_type: StreamType,
        requester: RequestOriginator,
        stream_token: impl Into<String>,
    ) -> Self {
        Self {
            stream_type,
            requester,
            stream_token: stream_token.into(),
            consumer_allowance: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRegistry {
    streams: BTreeMap<StreamId, StreamResumeInfo>,
    largest_used_stream_id: StreamId,
}

impl StreamRegistry {
    pub const fn new() -> Self {
        Self {
            streams: BTreeMap::new(),
            largest_used_stream_id: 0,
        }
    }

    pub fn open(&mut self, stream_id: StreamId, info: StreamResumeInfo) -> Result<(), ResumeError> {
        if info.stream_type == StreamType::FireAndForget {
            return Err(ResumeError::NotResumable {
                stream_id,
                stream_type: info.stream_type,
            });
        }
        if self.streams.contains_key(&stream_id) {
            return Err(ResumeError::DuplicateStream { stream_id });
        }
        if info.requester == RequestOriginator::Local && stream_id > self.largest_used_stream_id {
            self.largest_used_stream_id = stream_id;
        }
        self.streams.insert(stream_id, info);
        Ok(())
    }

    /// 移除流；未登记的流返回 `None`。
    pub fn close(&mut self, stream_id: StreamId) -> Option<StreamResumeInfo> {
        self.streams.remove(&stream_id)
    }

    /// 更新已登记流的消费额度；流已关闭时忽略并返回 `false`。
    pub fn update_allowance(&mut self, stream_id: StreamId, consumer_allowance: u32) -> bool {
        match self.streams.get_mut(&stream_id) {
            Some(info) => {
                info.consumer_allowance = consumer_allowance;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, stream_id: StreamId) -> Option<&StreamResumeInfo> {
        self.streams.get(&stream_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamId, &StreamResumeInfo)> {
        self.streams.iter().map(|(id, info)| (*id, info))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn largest_used_stream_id(&self) -> StreamId {
        self.largest_used_stream_id
    }
}
