// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events consumed by the controller's serial loop.
//!
//! Serializes with `{"type": "domain:action", ...fields}` format so the
//! write-ahead log stays greppable. Events fall in two groups: inputs from
//! components (submission, workers, runners, node poller) and
//! materialization events the controller emits so WAL replay reconstructs
//! analysis/task rows.

use crate::analysis::{Analysis, AnalysisState};
use crate::id::{AnalysisId, MachineName, NodeName, TaskId};
use crate::machine::Machine;
use crate::stage::{Stage, StageOutcome};
use crate::task::{Task, TaskOutcome, TaskState};
use serde::{Deserialize, Serialize};

/// Events that trigger state transitions in the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- submission --
    /// A new untracked analysis directory exists and wants tracking.
    #[serde(rename = "analysis:tracknew")]
    TrackNew { id: AnalysisId },

    // -- controller materialization --
    /// Analysis row inserted (carries the full row for WAL replay).
    #[serde(rename = "analysis:tracked")]
    AnalysisTracked { analysis: Box<Analysis> },

    #[serde(rename = "analysis:state")]
    AnalysisStateChanged {
        id: AnalysisId,
        state: AnalysisState,
    },

    /// Terminal scoring of an analysis once all tasks are terminal.
    #[serde(rename = "analysis:scored")]
    AnalysisScored {
        id: AnalysisId,
        score: u32,
        families: Vec<String>,
    },

    #[serde(rename = "analysis:error")]
    AnalysisError {
        id: AnalysisId,
        stage: String,
        message: String,
    },

    /// Manual platform selection for an analysis parked in WAITING_MANUAL.
    /// Emitted on behalf of the operator surface.
    #[serde(rename = "analysis:manual")]
    ManualSelected {
        id: AnalysisId,
        platforms: Vec<crate::task::TaskPlatform>,
    },

    #[serde(rename = "task:created")]
    TaskCreated { task: Box<Task> },

    #[serde(rename = "task:state")]
    TaskStateChanged { id: TaskId, state: TaskState },

    /// Scheduler reserved a machine (and possibly a remote node) for a task.
    #[serde(rename = "task:assigned")]
    TaskAssigned {
        id: TaskId,
        machine: MachineName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<NodeName>,
    },

    #[serde(rename = "task:error")]
    TaskError {
        id: TaskId,
        stage: String,
        message: String,
    },

    /// Post-processing attached a score to a task.
    #[serde(rename = "task:scored")]
    TaskScored {
        id: TaskId,
        score: u32,
        families: Vec<String>,
    },

    // -- worker / runner inputs --
    #[serde(rename = "stage:complete")]
    StageComplete {
        stage: Stage,
        analysis_id: AnalysisId,
        /// Set for post (per-task) stages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        outcome: StageOutcome,
    },

    #[serde(rename = "task:finished")]
    TaskFinished { id: TaskId, outcome: TaskOutcome },

    /// Operator asked for a task to be cancelled.
    #[serde(rename = "task:cancel")]
    TaskCancel { id: TaskId },

    // -- machines and nodes --
    /// A machine was disabled or disappeared mid-task.
    #[serde(rename = "machine:gone")]
    MachineGone { name: MachineName, reason: String },

    /// Remote node machine list refreshed by the poller.
    #[serde(rename = "node:machines")]
    NodeMachines {
        name: NodeName,
        machines: Vec<Machine>,
    },

    #[serde(rename = "node:disconnected")]
    NodeDisconnected { name: NodeName },

    /// A task was handed to a remote node.
    #[serde(rename = "node:task")]
    NodeTaskDispatched { task_id: TaskId, node: NodeName },

    // -- routes --
    #[serde(rename = "route:applied")]
    RouteApplied { task_id: TaskId, handle: String },

    #[serde(rename = "route:removed")]
    RouteRemoved { task_id: TaskId },

    // -- control --
    #[serde(rename = "shutdown")]
    Shutdown,
}

impl Event {
    /// The analysis this event concerns, if any.
    pub fn analysis_id(&self) -> Option<AnalysisId> {
        match self {
            Event::TrackNew { id }
            | Event::AnalysisStateChanged { id, .. }
            | Event::AnalysisScored { id, .. }
            | Event::AnalysisError { id, .. }
            | Event::ManualSelected { id, .. } => Some(id.clone()),
            Event::AnalysisTracked { analysis } => Some(analysis.id.clone()),
            Event::StageComplete { analysis_id, .. } => Some(analysis_id.clone()),
            Event::TaskCreated { task } => Some(task.analysis_id.clone()),
            Event::TaskStateChanged { id, .. }
            | Event::TaskAssigned { id, .. }
            | Event::TaskError { id, .. }
            | Event::TaskScored { id, .. }
            | Event::TaskFinished { id, .. }
            | Event::TaskCancel { id } => Some(id.analysis_id()),
            Event::NodeTaskDispatched { task_id, .. } | Event::RouteApplied { task_id, .. } => {
                Some(task_id.analysis_id())
            }
            Event::RouteRemoved { task_id } => Some(task_id.analysis_id()),
            _ => None,
        }
    }

    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::TaskStateChanged { id, .. }
            | Event::TaskAssigned { id, .. }
            | Event::TaskError { id, .. }
            | Event::TaskScored { id, .. }
            | Event::TaskFinished { id, .. }
            | Event::TaskCancel { id } => Some(id.clone()),
            Event::TaskCreated { task } => Some(task.id.clone()),
            Event::StageComplete { task_id, .. } => task_id.clone(),
            Event::NodeTaskDispatched { task_id, .. }
            | Event::RouteApplied { task_id, .. }
            | Event::RouteRemoved { task_id } => Some(task_id.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
