// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling policy: match pending tasks to free machines.
//!
//! Local machines are preferred; remote candidates come from the last
//! machine snapshot each connected node advertised, bounded by the main
//! node's view of that node's free slots. The actual local reservation is
//! the pool's atomic `acquire`; this module holds the pure decision logic
//! so it stays testable without a pool.

use cuckoo_core::{Machine, MachineState, NodeName, Task, TaskId};
use cuckoo_storage::NodeStatus;
use std::collections::HashMap;

/// A remote scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCandidate {
    pub node: NodeName,
    pub machine: Machine,
}

/// Whether an advertised remote machine could run the task right now.
fn remote_machine_available(machine: &Machine, task: &Task) -> bool {
    machine.satisfies(&task.platform, &task.os_version, &task.required_tags)
        && machine.state == MachineState::Poweroff
        && !machine.is_disabled()
        && machine.reserved_by.is_none()
}

/// Free slots on a node: advertised available machines minus tasks we have
/// already dispatched there and not seen finish.
fn free_slots(node: &NodeName, status: &NodeStatus, node_tasks: &HashMap<TaskId, NodeName>) -> usize {
    let available = status
        .machines
        .iter()
        .filter(|m| m.state == MachineState::Poweroff && !m.is_disabled())
        .count();
    let in_flight = node_tasks.values().filter(|n| *n == node).count();
    available.saturating_sub(in_flight)
}

/// Pick a remote node advertising a candidate for the task.
///
/// Preference: the node with the most free slots, then name, so dispatch
/// spreads instead of piling onto one node. Within the node, candidates
/// order by `last_used_ms` then name, mirroring the local tie-break.
pub fn remote_candidate(
    task: &Task,
    nodes: &HashMap<NodeName, NodeStatus>,
    node_tasks: &HashMap<TaskId, NodeName>,
) -> Option<RemoteCandidate> {
    let mut best: Option<(usize, NodeName, Machine)> = None;

    for (name, status) in nodes {
        if !status.connected {
            continue;
        }
        let slots = free_slots(name, status, node_tasks);
        if slots == 0 {
            continue;
        }
        let candidate = status
            .machines
            .iter()
            .filter(|m| remote_machine_available(m, task))
            .min_by(|a, b| a.last_used_ms.cmp(&b.last_used_ms).then(a.name.cmp(&b.name)));
        let Some(machine) = candidate else {
            continue;
        };

        let replace = match &best {
            None => true,
            Some((best_slots, best_name, _)) => {
                slots > *best_slots || (slots == *best_slots && name < best_name)
            }
        };
        if replace {
            best = Some((slots, name.clone(), machine.clone()));
        }
    }

    best.map(|(_, node, machine)| RemoteCandidate { node, machine })
}

/// Whether any node (connected or not) has ever advertised a machine that
/// could satisfy the task. Feeds the NoMatchingMachine sweep together with
/// the local pool's view.
pub fn any_remote_matches(task: &Task, nodes: &HashMap<NodeName, NodeStatus>) -> bool {
    nodes.values().any(|status| {
        status
            .machines
            .iter()
            .any(|m| m.satisfies(&task.platform, &task.os_version, &task.required_tags))
    })
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
