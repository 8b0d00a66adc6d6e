// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! KVM machinery driven through libvirt's `virsh`.
//!
//! Machine names map to libvirt domain names. Restore reverts the domain
//! to its configured snapshot with `--running`, so the guest comes up
//! already executing.

use crate::driver::{require_state, DriverCaps, MachineryDriver, MachineryError};
use crate::subprocess::{run_checked, HYPERVISOR_TIMEOUT};
use async_trait::async_trait;
use cuckoo_core::{Machine, MachineState};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Configuration for the kvm machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvmConf {
    /// Path to the virsh binary.
    #[serde(default = "default_virsh")]
    pub virsh: String,
    /// Libvirt connection URI.
    #[serde(default = "default_uri")]
    pub uri: String,
}

fn default_virsh() -> String {
    "/usr/bin/virsh".to_string()
}

fn default_uri() -> String {
    "qemu:///system".to_string()
}

impl Default for KvmConf {
    fn default() -> Self {
        Self {
            virsh: default_virsh(),
            uri: default_uri(),
        }
    }
}

/// Driver for libvirt-managed KVM domains.
pub struct KvmDriver {
    conf: KvmConf,
}

impl KvmDriver {
    pub fn new(conf: KvmConf) -> Self {
        Self { conf }
    }

    fn virsh(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.conf.virsh);
        cmd.arg("-c").arg(&self.conf.uri);
        cmd.args(args);
        cmd
    }

    async fn domstate(&self, machine: &Machine) -> Result<MachineState, MachineryError> {
        let out = run_checked(
            self.virsh(&["domstate", machine.name.as_str()]),
            HYPERVISOR_TIMEOUT,
            "virsh domstate",
        )
        .await
        .map_err(|e| MachineryError::transient(machine, e))?;

        Ok(map_domstate(&out))
    }
}

/// libvirt state string to the normalized machine state.
fn map_domstate(raw: &str) -> MachineState {
    match raw.trim() {
        "shut off" => MachineState::Poweroff,
        "running" => MachineState::Running,
        "paused" | "pmsuspended" => MachineState::Suspended,
        "in shutdown" => MachineState::Running,
        _ => MachineState::Error,
    }
}

#[async_trait]
impl MachineryDriver for KvmDriver {
    fn name(&self) -> &'static str {
        "kvm"
    }

    fn caps(&self) -> DriverCaps {
        DriverCaps {
            acpi_stop: true,
            dump_memory: true,
            handle_paused: true,
        }
    }

    async fn restore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.domstate(machine).await?;
        require_state(
            machine,
            "restore_start",
            "poweroff",
            actual,
            actual == MachineState::Poweroff,
        )?;

        let snapshot = machine.snapshot.as_deref().unwrap_or("current");
        debug!(machine = %machine.name, snapshot, "reverting domain snapshot");
        run_checked(
            self.virsh(&[
                "snapshot-revert",
                machine.name.as_str(),
                snapshot,
                "--running",
            ]),
            HYPERVISOR_TIMEOUT,
            "virsh snapshot-revert",
        )
        .await
        // A failed revert can leave the domain half-defined.
        .map_err(|e| MachineryError::fatal(machine, e))?;
        Ok(())
    }

    async fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.domstate(machine).await?;
        require_state(
            machine,
            "norestore_start",
            "poweroff",
            actual,
            actual == MachineState::Poweroff,
        )?;

        run_checked(
            self.virsh(&["start", machine.name.as_str()]),
            HYPERVISOR_TIMEOUT,
            "virsh start",
        )
        .await
        .map_err(|e| MachineryError::transient(machine, e))?;
        Ok(())
    }

    async fn stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.domstate(machine).await?;
        if actual == MachineState::Poweroff {
            // Already off; idempotent, reported without fault escalation.
            return Err(MachineryError::transient(machine, "domain already shut off"));
        }
        require_state(
            machine,
            "stop",
            "running|suspended",
            actual,
            matches!(actual, MachineState::Running | MachineState::Suspended),
        )?;

        run_checked(
            self.virsh(&["destroy", machine.name.as_str()]),
            HYPERVISOR_TIMEOUT,
            "virsh destroy",
        )
        .await
        .map_err(|e| MachineryError::fatal(machine, e))?;
        Ok(())
    }

    async fn acpi_stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.domstate(machine).await?;
        require_state(
            machine,
            "acpi_stop",
            "running|suspended",
            actual,
            matches!(actual, MachineState::Running | MachineState::Suspended),
        )?;

        run_checked(
            self.virsh(&["shutdown", machine.name.as_str(), "--mode", "acpi"]),
            HYPERVISOR_TIMEOUT,
            "virsh shutdown",
        )
        .await
        .map_err(|e| MachineryError::transient(machine, e))?;
        Ok(())
    }

    async fn state(&self, machine: &Machine) -> Result<MachineState, MachineryError> {
        self.domstate(machine).await
    }

    async fn dump_memory(&self, machine: &Machine, dest: &Path) -> Result<(), MachineryError> {
        let dest = dest.to_string_lossy();
        run_checked(
            self.virsh(&[
                "dump",
                machine.name.as_str(),
                dest.as_ref(),
                "--memory-only",
                "--live",
            ]),
            HYPERVISOR_TIMEOUT,
            "virsh dump",
        )
        .await
        .map_err(|e| MachineryError::transient(machine, e))?;
        Ok(())
    }

    async fn handle_paused(&self, machine: &Machine) -> Result<(), MachineryError> {
        run_checked(
            self.virsh(&["resume", machine.name.as_str()]),
            HYPERVISOR_TIMEOUT,
            "virsh resume",
        )
        .await
        .map_err(|e| MachineryError::transient(machine, e))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "kvm_tests.rs"]
mod tests;
