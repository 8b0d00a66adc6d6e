// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configured machines and their runtime state.

use crate::id::{MachineName, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Normalized runtime state of a machine.
///
/// `Restoring` and `Stopping` are owned by the pool; drivers only ever
/// report `Poweroff`, `Running`, `Suspended` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Poweroff,
    Restoring,
    Running,
    Stopping,
    Suspended,
    Error,
    Disabled,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineState::Poweroff => "poweroff",
            MachineState::Restoring => "restoring",
            MachineState::Running => "running",
            MachineState::Stopping => "stopping",
            MachineState::Suspended => "suspended",
            MachineState::Error => "error",
            MachineState::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// A configured VM: static configuration plus pool-owned runtime fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub name: MachineName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub ip: IpAddr,
    pub platform: String,
    pub os_version: String,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    /// Installed-software and capability tags (`dotnet`, `browser_firefox`).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Snapshot reference to restore before each detonation. `None` lets
    /// the driver use the hypervisor's current snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// Name of the machinery driver this machine belongs to.
    pub machinery: String,

    // -- runtime fields, owned by the machine pool --
    #[serde(default = "default_state")]
    pub state: MachineState,
    /// Task currently holding the reservation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_by: Option<TaskId>,
    /// Task currently holding the operational lock, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    /// Epoch ms of the last release, for least-recently-used tie-breaks.
    #[serde(default)]
    pub last_used_ms: u64,
}

fn default_architecture() -> String {
    "amd64".to_string()
}

fn default_agent_port() -> u16 {
    8000
}

fn default_state() -> MachineState {
    MachineState::Poweroff
}

impl Machine {
    /// A machine can be handed to the scheduler iff it is powered off, not
    /// disabled, not locked, and not reserved by another task.
    pub fn is_eligible_for(&self, task: &TaskId) -> bool {
        self.state == MachineState::Poweroff
            && self.disabled_reason.is_none()
            && self.locked_by.is_none()
            && self
                .reserved_by
                .as_ref()
                .is_none_or(|holder| holder == task)
    }

    /// Platform/version/tag match against a task's requirements.
    pub fn satisfies(
        &self,
        platform: &str,
        os_version: &str,
        required_tags: &BTreeSet<String>,
    ) -> bool {
        self.platform == platform
            && self.os_version == os_version
            && required_tags.is_subset(&self.tags)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_reason.is_some() || self.state == MachineState::Disabled
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
