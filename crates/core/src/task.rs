// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task rows and their state machine.

use crate::fault::Fault;
use crate::id::{AnalysisId, MachineName, NodeName, TaskId};
use crate::route::Route;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One platform/os_version combination a task detonates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskPlatform {
    pub platform: String,
    pub os_version: String,
    /// Machine tags this platform requires (installed software, browsers).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl TaskPlatform {
    pub fn new(platform: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            os_version: os_version.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for TaskPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.os_version)
    }
}

/// Lifecycle state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    Starting,
    Running,
    Stopping,
    PendingPost,
    Reported,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Reported | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// States in which a machine is held on behalf of the task.
    pub fn holds_machine(&self) -> bool {
        matches!(
            self,
            TaskState::Assigned | TaskState::Starting | TaskState::Running | TaskState::Stopping
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Stopping => "stopping",
            TaskState::PendingPost => "pending_post",
            TaskState::Reported => "reported",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Outcome a task runner reports to the controller via `task:finished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The guest ran; results (possibly partial on timeout) were collected.
    Detonated {
        #[serde(default)]
        timed_out: bool,
    },
    /// Infrastructure failed before or during detonation.
    Failed { fault: Fault },
    /// The task was cancelled by the operator or on startup recovery.
    Cancelled,
}

/// One detonation of an analysis on one platform/os_version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub analysis_id: AnalysisId,
    pub platform: String,
    pub os_version: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_tags: BTreeSet<String>,
    pub priority: u32,
    /// Detonation budget in seconds.
    pub timeout: u32,
    #[serde(default)]
    pub route: Route,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeName>,
    #[serde(default)]
    pub score: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<String>,
    /// Stage name to failure messages, surfaced verbatim in reports.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, Vec<String>>,
    pub created_at_ms: u64,
}

impl Task {
    pub fn new(
        id: TaskId,
        analysis_id: AnalysisId,
        platform: TaskPlatform,
        priority: u32,
        timeout: u32,
        route: Route,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            analysis_id,
            platform: platform.platform,
            os_version: platform.os_version,
            required_tags: platform.tags,
            priority,
            timeout,
            route,
            state: TaskState::Pending,
            machine: None,
            node: None,
            score: 0,
            families: Vec::new(),
            errors: BTreeMap::new(),
            created_at_ms,
        }
    }

    pub fn record_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors
            .entry(stage.to_string())
            .or_default()
            .push(message.into());
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
