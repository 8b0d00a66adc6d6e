// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator configuration: `conf/cuckoo.toml`.
//!
//! Invalid configuration is fatal at startup; nothing binds or boots
//! before the file parses and validates.

use cuckoo_core::{Limits, TaskPlatform};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration {0} does not exist")]
    Missing(String),
    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("configuration error: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitLimits {
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_min_file_size() -> u64 {
    133
}

fn default_max_file_size() -> u64 {
    4 * 1024 * 1024 * 1024
}

impl Default for SubmitLimits {
    fn default() -> Self {
        Self {
            min_file_size: default_min_file_size(),
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConf {
    #[serde(default = "default_platforms")]
    pub default_platforms: Vec<TaskPlatform>,
    #[serde(default = "default_browser")]
    pub default_browser: String,
}

fn default_platforms() -> Vec<TaskPlatform> {
    vec![TaskPlatform::new("windows", "10")]
}

fn default_browser() -> String {
    "firefox".to_string()
}

impl Default for PlatformConf {
    fn default() -> Self {
        Self {
            default_platforms: default_platforms(),
            default_browser: default_browser(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultServerConf {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: IpAddr,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Per-frame payload cap in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
}

fn default_listen_ip() -> IpAddr {
    "192.168.30.1".parse().unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

fn default_listen_port() -> u16 {
    2042
}

fn default_max_frame_len() -> u32 {
    64 * 1024 * 1024
}

impl Default for ResultServerConf {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateControlConf {
    /// Cancel analyses whose target cannot be identified.
    #[serde(default = "default_true")]
    pub cancel_unidentified: bool,
    /// Cancel-and-release abandoned tasks on startup. The alternative,
    /// resuming them, assumes agent connectivity survived the restart;
    /// it rarely does, so cancelling is the default.
    #[serde(default = "default_true")]
    pub cancel_abandoned: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StateControlConf {
    fn default() -> Self {
        Self {
            cancel_unidentified: true,
            cancel_abandoned: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkRoutingConf {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConf {
    #[serde(default = "default_identification_workers")]
    pub identification: usize,
    #[serde(default = "default_pre_workers")]
    pub pre: usize,
    #[serde(default = "default_post_workers")]
    pub post: usize,
    #[serde(default = "default_identification_timeout")]
    pub identification_timeout_secs: u64,
    #[serde(default = "default_pre_timeout")]
    pub pre_timeout_secs: u64,
    #[serde(default = "default_post_timeout")]
    pub post_timeout_secs: u64,
}

fn default_identification_workers() -> usize {
    2
}

fn default_pre_workers() -> usize {
    2
}

fn default_post_workers() -> usize {
    4
}

fn default_identification_timeout() -> u64 {
    30
}

fn default_pre_timeout() -> u64 {
    120
}

fn default_post_timeout() -> u64 {
    300
}

impl Default for WorkersConf {
    fn default() -> Self {
        Self {
            identification: default_identification_workers(),
            pre: default_pre_workers(),
            post: default_post_workers(),
            identification_timeout_secs: default_identification_timeout(),
            pre_timeout_secs: default_pre_timeout(),
            post_timeout_secs: default_post_timeout(),
        }
    }
}

/// The whole `conf/cuckoo.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CuckooConfig {
    /// Machinery names to load from `conf/machineries/<name>.toml`.
    #[serde(default)]
    pub machineries: Vec<String>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub submit: SubmitLimits,
    #[serde(default)]
    pub platform: PlatformConf,
    #[serde(default)]
    pub resultserver: ResultServerConf,
    #[serde(default)]
    pub state_control: StateControlConf,
    #[serde(default)]
    pub network_routing: NetworkRoutingConf,
    #[serde(default)]
    pub workers: WorkersConf,
}

impl CuckooConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: CuckooConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.submit.min_file_size >= self.submit.max_file_size {
            return Err(ConfigError::Invalid(
                "submit.min_file_size must be below submit.max_file_size".to_string(),
            ));
        }
        if self.limits.max_platforms == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_platforms must be at least 1".to_string(),
            ));
        }
        if self.workers.identification == 0 || self.workers.pre == 0 || self.workers.post == 0 {
            return Err(ConfigError::Invalid(
                "worker counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the default configuration (used by `createcwd`).
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(&CuckooConfig::default())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
