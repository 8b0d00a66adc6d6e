// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submission settings and the limits enforced at ingest.

use crate::route::Route;
use crate::task::TaskPlatform;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for submitted settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("timeout {got}s exceeds maximum {max}s")]
    TimeoutTooLarge { got: u32, max: u32 },
    #[error("priority {got} exceeds maximum {max}")]
    PriorityTooLarge { got: u32, max: u32 },
    #[error("{got} platforms exceeds maximum {max}")]
    TooManyPlatforms { got: usize, max: usize },
    #[error("priority must be at least 1")]
    PriorityZero,
}

/// Hard limits a submission must stay within, from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_timeout")]
    pub max_timeout: u32,
    #[serde(default = "default_max_priority")]
    pub max_priority: u32,
    #[serde(default = "default_max_platforms")]
    pub max_platforms: usize,
}

fn default_max_timeout() -> u32 {
    900
}

fn default_max_priority() -> u32 {
    999
}

fn default_max_platforms() -> usize {
    4
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_timeout: default_max_timeout(),
            max_priority: default_max_priority(),
            max_platforms: default_max_platforms(),
        }
    }
}

/// Parameters of one submission, snapshotted into `analysis.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Detonation budget in seconds for each task.
    pub timeout: u32,
    /// Scheduling priority; higher runs first.
    pub priority: u32,
    /// Platform/os_version pairs to detonate on. Empty means "let
    /// pre-analysis pick" from identification.
    #[serde(default)]
    pub platforms: Vec<TaskPlatform>,
    /// Network route for every task of this analysis.
    #[serde(default)]
    pub route: Route,
    /// Pause after identification and wait for manual platform selection.
    #[serde(default)]
    pub manual: bool,
    /// Command to hand the guest agent instead of the default launcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_filename: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: 120,
            priority: 1,
            platforms: Vec::new(),
            route: Route::none(),
            manual: false,
            orig_filename: None,
        }
    }
}

impl Settings {
    /// Enforce submission limits. Called once at ingest; settings stored in
    /// an analysis snapshot are trusted afterwards.
    pub fn validate(&self, limits: &Limits) -> Result<(), SettingsError> {
        if self.timeout > limits.max_timeout {
            return Err(SettingsError::TimeoutTooLarge {
                got: self.timeout,
                max: limits.max_timeout,
            });
        }
        if self.priority == 0 {
            return Err(SettingsError::PriorityZero);
        }
        if self.priority > limits.max_priority {
            return Err(SettingsError::PriorityTooLarge {
                got: self.priority,
                max: limits.max_priority,
            });
        }
        if self.platforms.len() > limits.max_platforms {
            return Err(SettingsError::TooManyPlatforms {
                got: self.platforms.len(),
                max: limits.max_platforms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
