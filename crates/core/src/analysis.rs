// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Analysis rows and their state machine.

use crate::fault::Fault;
use crate::id::{AnalysisId, TaskId};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What kind of target was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    File,
    Url,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::File => write!(f, "file"),
            Category::Url => write!(f, "url"),
        }
    }
}

/// The file or URL under analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum TargetDescriptor {
    File {
        filename: String,
        size: u64,
        /// Canonical copy lives in `binaries/<h0>/<h1>/<sha256>`.
        sha256: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    Url { url: String },
}

impl TargetDescriptor {
    pub fn category(&self) -> Category {
        match self {
            TargetDescriptor::File { .. } => Category::File,
            TargetDescriptor::Url { .. } => Category::Url,
        }
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> &str {
        match self {
            TargetDescriptor::File { filename, .. } => filename,
            TargetDescriptor::Url { url } => url,
        }
    }
}

/// Lifecycle state of one analysis.
///
/// Transitions are monotonic along the pipeline order; any `Pending*` state
/// may regress to `FatalError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Untracked,
    PendingIdentification,
    WaitingManual,
    PendingPre,
    TasksPending,
    Finished,
    FatalError,
}

impl AnalysisState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisState::Finished | AnalysisState::FatalError)
    }

    fn order(&self) -> u8 {
        match self {
            AnalysisState::Untracked => 0,
            AnalysisState::PendingIdentification => 1,
            AnalysisState::WaitingManual => 2,
            AnalysisState::PendingPre => 3,
            AnalysisState::TasksPending => 4,
            AnalysisState::Finished => 5,
            AnalysisState::FatalError => 6,
        }
    }

    /// Whether moving to `next` respects the pipeline order.
    pub fn can_transition(&self, next: AnalysisState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == AnalysisState::FatalError {
            return true;
        }
        next.order() > self.order()
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisState::Untracked => "untracked",
            AnalysisState::PendingIdentification => "pending_identification",
            AnalysisState::WaitingManual => "waiting_manual",
            AnalysisState::PendingPre => "pending_pre",
            AnalysisState::TasksPending => "tasks_pending",
            AnalysisState::Finished => "finished",
            AnalysisState::FatalError => "fatal_error",
        };
        write!(f, "{s}")
    }
}

/// One submitted job: the target, its settings snapshot, and derived tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub created_at_ms: u64,
    pub target: TargetDescriptor,
    pub settings: Settings,
    pub state: AnalysisState,
    #[serde(default)]
    pub score: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<String>,
    /// Stage name to failure messages, surfaced verbatim in reports.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, Vec<String>>,
    /// Tasks belong to the analysis by id; tasks reference back by id.
    /// No object graph cycles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<TaskId>,
}

impl Analysis {
    pub fn new(
        id: AnalysisId,
        target: TargetDescriptor,
        settings: Settings,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            created_at_ms,
            target,
            settings,
            state: AnalysisState::Untracked,
            score: 0,
            families: Vec::new(),
            errors: BTreeMap::new(),
            task_ids: Vec::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.target.category()
    }

    pub fn record_fault(&mut self, stage: &str, fault: &Fault) {
        self.errors
            .entry(stage.to_string())
            .or_default()
            .push(fault.to_string());
    }

    pub fn record_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors
            .entry(stage.to_string())
            .or_default()
            .push(message.into());
    }
}

#[cfg(test)]
#[path = "analysis_tests.rs"]
mod tests;
