// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay.
//!
//! Five entity sets back the orchestrator: analyses, tasks, machines
//! (last-known snapshots; the machine pool is runtime-authoritative), node
//! records, and outstanding route handles. All row mutation flows through
//! `apply_event`, driven from the controller's serial loop, so replaying the
//! WAL over a snapshot reconstructs exactly this state.

use cuckoo_core::{
    Analysis, AnalysisId, AnalysisState, Event, Machine, MachineName, NodeName, Task, TaskId,
    TaskState,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Last-known view of one task-running node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub last_seen_ms: u64,
    /// Machines the node advertised on its last poll.
    #[serde(default)]
    pub machines: Vec<Machine>,
}

/// The complete materialized state of one working directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterializedState {
    #[serde(default)]
    pub analyses: HashMap<AnalysisId, Analysis>,
    #[serde(default)]
    pub tasks: HashMap<TaskId, Task>,
    #[serde(default)]
    pub machines: HashMap<MachineName, Machine>,
    /// Task to remote node assignments still in flight.
    #[serde(default)]
    pub node_tasks: HashMap<TaskId, NodeName>,
    /// Rooter handles that have been applied but not yet removed.
    #[serde(default)]
    pub route_handles: HashMap<TaskId, String>,
    #[serde(default)]
    pub nodes: HashMap<NodeName, NodeStatus>,
}

impl MaterializedState {
    /// Apply an event to the state. Idempotent: re-applying an already
    /// observed event leaves the state unchanged, which makes snapshot +
    /// replay overlap harmless.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::AnalysisTracked { analysis } => {
                self.analyses
                    .entry(analysis.id.clone())
                    .or_insert_with(|| (**analysis).clone());
            }
            Event::AnalysisStateChanged { id, state } => {
                let Some(analysis) = self.analyses.get_mut(id) else {
                    warn!(analysis = %id, "state change for unknown analysis");
                    return;
                };
                if analysis.state == *state || analysis.state.can_transition(*state) {
                    analysis.state = *state;
                } else {
                    warn!(
                        analysis = %id,
                        from = %analysis.state,
                        to = %state,
                        "ignoring out-of-order analysis transition"
                    );
                }
            }
            Event::AnalysisScored {
                id,
                score,
                families,
            } => {
                if let Some(analysis) = self.analyses.get_mut(id) {
                    analysis.score = *score;
                    analysis.families = families.clone();
                }
            }
            Event::AnalysisError { id, stage, message } => {
                if let Some(analysis) = self.analyses.get_mut(id) {
                    let messages = analysis.errors.entry(stage.clone()).or_default();
                    if !messages.contains(message) {
                        messages.push(message.clone());
                    }
                }
            }
            Event::ManualSelected { id, platforms } => {
                if let Some(analysis) = self.analyses.get_mut(id) {
                    if !platforms.is_empty() {
                        analysis.settings.platforms = platforms.clone();
                    }
                }
            }
            Event::TaskCreated { task } => {
                self.tasks
                    .entry(task.id.clone())
                    .or_insert_with(|| (**task).clone());
                if let Some(analysis) = self.analyses.get_mut(&task.analysis_id) {
                    if !analysis.task_ids.contains(&task.id) {
                        analysis.task_ids.push(task.id.clone());
                    }
                }
            }
            Event::TaskStateChanged { id, state } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.state = *state;
                    if state.is_terminal() {
                        self.node_tasks.remove(id);
                    }
                }
            }
            Event::TaskAssigned { id, machine, node } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.state = TaskState::Assigned;
                    task.machine = Some(machine.clone());
                    task.node = node.clone();
                }
                if let Some(node) = node {
                    self.node_tasks.insert(id.clone(), node.clone());
                }
            }
            Event::TaskError { id, stage, message } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    let messages = task.errors.entry(stage.clone()).or_default();
                    if !messages.contains(message) {
                        messages.push(message.clone());
                    }
                }
            }
            Event::TaskScored {
                id,
                score,
                families,
            } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.score = *score;
                    task.families = families.clone();
                }
            }
            Event::NodeMachines { name, machines } => {
                let status = self.nodes.entry(name.clone()).or_default();
                status.connected = true;
                status.machines = machines.clone();
                for machine in machines {
                    self.machines.insert(machine.name.clone(), machine.clone());
                }
            }
            Event::NodeDisconnected { name } => {
                if let Some(status) = self.nodes.get_mut(name) {
                    status.connected = false;
                }
            }
            Event::NodeTaskDispatched { task_id, node } => {
                self.node_tasks.insert(task_id.clone(), node.clone());
            }
            Event::MachineGone { name, reason } => {
                if let Some(machine) = self.machines.get_mut(name) {
                    machine.state = cuckoo_core::MachineState::Disabled;
                    machine.disabled_reason = Some(reason.clone());
                }
            }
            Event::RouteApplied { task_id, handle } => {
                self.route_handles.insert(task_id.clone(), handle.clone());
            }
            Event::RouteRemoved { task_id } => {
                self.route_handles.remove(task_id);
            }
            // Inputs the controller reacts to; they carry no row mutation
            // themselves; the controller emits the row mutations.
            Event::TrackNew { .. }
            | Event::StageComplete { .. }
            | Event::TaskFinished { .. }
            | Event::TaskCancel { .. }
            | Event::Shutdown => {}
        }
    }

    /// Record or refresh a locally configured machine snapshot.
    pub fn upsert_machine(&mut self, machine: Machine) {
        self.machines.insert(machine.name.clone(), machine);
    }

    // -- queries --

    pub fn analysis(&self, id: &AnalysisId) -> Option<&Analysis> {
        self.analyses.get(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks of one analysis, in task-number order.
    pub fn tasks_of(&self, id: &AnalysisId) -> Vec<&Task> {
        let Some(analysis) = self.analyses.get(id) else {
            return Vec::new();
        };
        let mut tasks: Vec<&Task> = analysis
            .task_ids
            .iter()
            .filter_map(|tid| self.tasks.get(tid))
            .collect();
        tasks.sort_by_key(|t| t.id.number());
        tasks
    }

    /// True when every task of the analysis is in a terminal state.
    pub fn all_tasks_terminal(&self, id: &AnalysisId) -> bool {
        self.tasks_of(id).iter().all(|t| t.state.is_terminal())
    }

    /// PENDING tasks in scheduling order:
    /// `(priority desc, created_at asc, task_id asc)`.
    pub fn pending_tasks(&self) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then(a.id.cmp(&b.id))
        });
        pending
    }

    /// Tasks that claim to hold a machine. After a restart these have no
    /// live runner and must be recovered.
    pub fn abandoned_tasks(&self) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| {
                matches!(
                    t.state,
                    TaskState::Starting | TaskState::Running | TaskState::Stopping
                ) || t.state == TaskState::Assigned
            })
            .collect()
    }

    /// Analyses that are not yet terminal.
    pub fn live_analyses(&self) -> Vec<&Analysis> {
        self.analyses
            .values()
            .filter(|a| !a.state.is_terminal())
            .collect()
    }

    /// Maximum task score for the analysis (the analysis score).
    pub fn max_task_score(&self, id: &AnalysisId) -> u32 {
        self.tasks_of(id).iter().map(|t| t.score).max().unwrap_or(0)
    }

    /// Nodes currently marked connected.
    pub fn connected_nodes(&self) -> Vec<&NodeName> {
        self.nodes
            .iter()
            .filter(|(_, s)| s.connected)
            .map(|(n, _)| n)
            .collect()
    }

    /// Outstanding route handles (should be empty when idle; a non-empty
    /// set with no live tasks indicates a handle leak).
    pub fn leaked_route_handles(&self) -> Vec<(&TaskId, &String)> {
        self.route_handles
            .iter()
            .filter(|(task_id, _)| {
                self.tasks
                    .get(*task_id)
                    .map(|t| t.state.is_terminal())
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn analysis_state(&self, id: &AnalysisId) -> Option<AnalysisState> {
        self.analyses.get(id).map(|a| a.state)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
