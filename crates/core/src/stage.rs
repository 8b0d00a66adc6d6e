// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage identifiers and the reports stage workers hand the controller.

use crate::fault::Fault;
use crate::task::TaskPlatform;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three worker-pool stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Identification,
    Pre,
    Post,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Identification => "identification",
            Stage::Pre => "pre",
            Stage::Post => "post",
        }
    }

    /// Artifact filename written into the analysis (or task) directory.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Stage::Identification => "identification.json",
            Stage::Pre => "pre.json",
            Stage::Post => "post.json",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identification artifact: what the target turned out to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    /// Coarse target family: `pe`, `elf`, `zip`, `pdf`, `doc`, `script`,
    /// `url`, or `unknown`.
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Pre-analysis artifact: the platforms tasks will be created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreReport {
    pub platforms: Vec<TaskPlatform>,
}

/// Post-processing artifact for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReport {
    pub score: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<String>,
}

/// Typed payload of a `stage:complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageReport {
    Identification(Identification),
    Pre(PreReport),
    Post(PostReport),
}

impl StageReport {
    pub fn stage(&self) -> Stage {
        match self {
            StageReport::Identification(_) => Stage::Identification,
            StageReport::Pre(_) => Stage::Pre,
            StageReport::Post(_) => Stage::Post,
        }
    }
}

/// Outcome a stage worker reports back to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed { report: StageReport },
    Failed { fault: Fault },
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
