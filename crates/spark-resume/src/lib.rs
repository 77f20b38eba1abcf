#![deny(unsafe_code)]
#![doc = "spark-resume: 连接中断后按位置重放帧的续传日志。"]
#![doc = ""]
#![doc = "== 模块划分 =="]
#![doc = "1. `log`：热续传日志，按字节容量从最旧帧开始淘汰。"]
#![doc = "2. `cold`：冷续传日志，额外登记打开的流并持久化到文件。"]
#![doc = "3. `manager`：传输层使用的 `ResumeManager` 接口。"]
#![doc = "4. `negotiation`：RESUME / RESUME_OK 握手与保活中的位置判定。"]
#![doc = ""]
#![doc = "== 线程模型 =="]
#![doc = "日志不带内部锁，由持有它的传输组件串行化访问。"]

mod cold;
mod config;
mod error;
mod frame;
mod log;
mod manager;
mod stats;
mod streams;
mod transport;

pub mod negotiation;

pub use cold::ColdResumeLog;
pub use config::{DEFAULT_CAPACITY_BYTES, ResumeSettings};
pub use error::{ConfigError, ResumeError};
pub use frame::{FrameClassifier, FrameType, ResumePosition, RsocketFrameClassifier, StreamId};
pub use log::ResumeLog;
pub use manager::ResumeManager;
pub use negotiation::{ResumeAccepted, ResumeReport};
pub use stats::{NoopResumeStats, ResumeBufferGauge, ResumeStats};
pub use streams::{RequestOriginator, StreamRegistry, StreamResumeInfo, StreamType};
pub use transport::FrameSink;
