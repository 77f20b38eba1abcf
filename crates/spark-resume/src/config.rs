//! 续传配置。
//!
//! # 契约说明（What）
//! - `capacity_bytes`：续传日志保留的最大字节数，默认 1 MiB，必须大于 0；
//! - `cold_resume_path`：冷续传状态文件路径，缺省表示仅启用热续传。
//!
//! ```toml
//! capacity_bytes = 65536
//! cold_resume_path = "/var/lib/spark/resume.json"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 默认续传缓冲容量：1 MiB。
pub const DEFAULT_CAPACITY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResumeSettings {
    pub capacity_bytes: usize,
    pub cold_resume_path: Option<PathBuf>,
}

impl Default for ResumeSettings {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            cold_resume_path: None,
        }
    }
}

impl ResumeSettings {
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            ..Self::default()
        }
    }

    /// 解析 TOML 并校验。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let settings: Self =
            toml::from_str(source).map_err(|error| ConfigError::Parse(error.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity_bytes == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}
