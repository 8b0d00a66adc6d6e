// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency-safe registry of configured machines.
//!
//! The pool owns all machine state mutation: reservation, locking,
//! normalized state, disabling. One mutex serializes the registry;
//! per-machine transitions are check-and-set under that lock, which gives
//! the total order per machine the scheduler relies on. The lock is never
//! held across driver I/O; drivers are called by the task runner between
//! pool calls.

use cuckoo_core::{Machine, MachineName, MachineState, TaskId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no machine named {0}")]
    UnknownMachine(String),
    #[error("machine {machine} is reserved by {holder}, not {task}")]
    NotReservedBy {
        machine: String,
        holder: String,
        task: String,
    },
    #[error("machine {machine} is locked by {holder}")]
    Locked { machine: String, holder: String },
}

/// Shared, thread-safe machine registry.
#[derive(Clone, Default)]
pub struct MachinePool {
    inner: Arc<Mutex<HashMap<MachineName, Machine>>>,
}

impl MachinePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register machines loaded from configuration. Existing runtime state
    /// for a machine of the same name is preserved.
    pub fn register(&self, machines: Vec<Machine>) {
        let mut inner = self.inner.lock();
        for machine in machines {
            inner.entry(machine.name.clone()).or_insert(machine);
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Snapshot of every machine, for queries and the node API.
    pub fn snapshot(&self) -> Vec<Machine> {
        let mut machines: Vec<Machine> = self.inner.lock().values().cloned().collect();
        machines.sort_by(|a, b| a.name.cmp(&b.name));
        machines
    }

    pub fn get(&self, name: &MachineName) -> Option<Machine> {
        self.inner.lock().get(name).cloned()
    }

    /// Eligible machines matching a platform/version/tag requirement, in
    /// scheduler preference order (least recently used, then name).
    pub fn list_by_tags(
        &self,
        platform: &str,
        os_version: &str,
        required_tags: &BTreeSet<String>,
        task: &TaskId,
    ) -> Vec<Machine> {
        let inner = self.inner.lock();
        let mut candidates: Vec<Machine> = inner
            .values()
            .filter(|m| m.satisfies(platform, os_version, required_tags))
            .filter(|m| m.is_eligible_for(task))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.last_used_ms.cmp(&b.last_used_ms).then(a.name.cmp(&b.name)));
        candidates
    }

    /// Whether any registered machine could ever satisfy the requirement,
    /// regardless of current availability. Used for the NoMatchingMachine
    /// sweep.
    pub fn any_machine_matches(
        &self,
        platform: &str,
        os_version: &str,
        required_tags: &BTreeSet<String>,
    ) -> bool {
        self.inner
            .lock()
            .values()
            .any(|m| m.satisfies(platform, os_version, required_tags))
    }

    /// Atomically reserve the best eligible candidate for a task.
    ///
    /// Returns `None` when no candidate is currently available. The
    /// check-and-set happens under the registry lock, so two concurrent
    /// scheduler ticks can never reserve the same machine.
    pub fn acquire(
        &self,
        platform: &str,
        os_version: &str,
        required_tags: &BTreeSet<String>,
        task: &TaskId,
    ) -> Option<Machine> {
        let mut inner = self.inner.lock();
        let best = inner
            .values()
            .filter(|m| m.satisfies(platform, os_version, required_tags))
            .filter(|m| m.is_eligible_for(task))
            .min_by(|a, b| a.last_used_ms.cmp(&b.last_used_ms).then(a.name.cmp(&b.name)))
            .map(|m| m.name.clone())?;

        let machine = inner.get_mut(&best)?;
        machine.reserved_by = Some(task.clone());
        Some(machine.clone())
    }

    /// Reserve a specific machine (startup recovery re-reserving for an
    /// abandoned task). Fails the CAS if it is no longer eligible.
    pub fn reserve(&self, name: &MachineName, task: &TaskId) -> Result<Machine, PoolError> {
        let mut inner = self.inner.lock();
        let machine = inner
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownMachine(name.to_string()))?;
        if !machine.is_eligible_for(task) {
            return Err(PoolError::Locked {
                machine: name.to_string(),
                holder: machine
                    .reserved_by
                    .as_ref()
                    .or(machine.locked_by.as_ref())
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| machine.state.to_string()),
            });
        }
        machine.reserved_by = Some(task.clone());
        Ok(machine.clone())
    }

    /// Take the operational lock before driving the machine. Requires the
    /// caller to hold the reservation.
    pub fn lock(&self, name: &MachineName, task: &TaskId) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        let machine = inner
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownMachine(name.to_string()))?;
        match &machine.reserved_by {
            Some(holder) if holder == task => {}
            other => {
                return Err(PoolError::NotReservedBy {
                    machine: name.to_string(),
                    holder: other
                        .as_ref()
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "nobody".to_string()),
                    task: task.to_string(),
                })
            }
        }
        if let Some(holder) = &machine.locked_by {
            if holder != task {
                return Err(PoolError::Locked {
                    machine: name.to_string(),
                    holder: holder.to_string(),
                });
            }
        }
        machine.locked_by = Some(task.clone());
        Ok(())
    }

    /// Update the normalized state of a machine (driven by the runner
    /// around driver calls).
    pub fn mark_state(&self, name: &MachineName, state: MachineState) {
        let mut inner = self.inner.lock();
        if let Some(machine) = inner.get_mut(name) {
            machine.state = state;
        } else {
            warn!(machine = %name, "mark_state on unknown machine");
        }
    }

    /// Release a machine at task end: clear reservation and lock, record
    /// last use. A fatal error message disables the machine instead of
    /// returning it to the pool.
    pub fn release(&self, name: &MachineName, now_ms: u64, errored: Option<&str>) {
        let mut inner = self.inner.lock();
        let Some(machine) = inner.get_mut(name) else {
            warn!(machine = %name, "release of unknown machine");
            return;
        };
        machine.reserved_by = None;
        machine.locked_by = None;
        machine.last_used_ms = now_ms;
        match errored {
            Some(reason) => {
                info!(machine = %name, reason, "disabling machine after fatal error");
                machine.state = MachineState::Disabled;
                machine.disabled_reason = Some(reason.to_string());
            }
            // A machine disabled mid-task stays disabled.
            None if machine.disabled_reason.is_some() => {}
            None => {
                machine.state = MachineState::Poweroff;
            }
        }
    }

    /// Disable a machine outright (operator action or machine:gone).
    pub fn disable(&self, name: &MachineName, reason: &str) {
        let mut inner = self.inner.lock();
        if let Some(machine) = inner.get_mut(name) {
            machine.state = MachineState::Disabled;
            machine.reserved_by = None;
            machine.locked_by = None;
            machine.disabled_reason = Some(reason.to_string());
        }
    }

    /// Remove a machine from the registry entirely.
    pub fn remove(&self, name: &MachineName) -> bool {
        self.inner.lock().remove(name).is_some()
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
