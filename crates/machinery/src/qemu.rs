// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain QEMU machinery: one qemu-system process per running machine.
//!
//! Each restore creates a disposable qcow2 overlay on top of the machine's
//! base image, then boots QEMU with `-loadvm` so the guest resumes from its
//! snapshot. Stop kills the process and discards the overlay, which is what
//! makes detonations side-effect free.

use crate::driver::{require_state, DriverCaps, MachineryDriver, MachineryError};
use crate::subprocess::{run_checked, HYPERVISOR_TIMEOUT};
use async_trait::async_trait;
use cuckoo_core::{Machine, MachineName, MachineState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Configuration for the qemu machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QemuConf {
    #[serde(default = "default_qemu_img")]
    pub qemu_img: String,
    #[serde(default = "default_qemu_system")]
    pub qemu_system: String,
    /// Directory holding base images, one `<machine>.qcow2` per machine.
    pub image_dir: PathBuf,
    /// Directory for disposable overlays; cleared per stop.
    pub disposable_dir: PathBuf,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    /// Extra arguments appended to every qemu-system invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_qemu_img() -> String {
    "/usr/bin/qemu-img".to_string()
}

fn default_qemu_system() -> String {
    "/usr/bin/qemu-system-x86_64".to_string()
}

fn default_memory_mb() -> u32 {
    2048
}

impl Default for QemuConf {
    fn default() -> Self {
        Self {
            qemu_img: default_qemu_img(),
            qemu_system: default_qemu_system(),
            image_dir: PathBuf::from("/var/lib/cuckoo/images"),
            disposable_dir: PathBuf::from("/var/lib/cuckoo/disposables"),
            memory_mb: default_memory_mb(),
            extra_args: Vec::new(),
        }
    }
}

/// Driver managing qemu-system child processes directly.
pub struct QemuDriver {
    conf: QemuConf,
    children: Mutex<HashMap<MachineName, Child>>,
}

impl QemuDriver {
    pub fn new(conf: QemuConf) -> Self {
        Self {
            conf,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn base_image(&self, machine: &Machine) -> PathBuf {
        self.conf.image_dir.join(format!("{}.qcow2", machine.name))
    }

    fn overlay(&self, machine: &Machine) -> PathBuf {
        self.conf
            .disposable_dir
            .join(format!("{}.qcow2", machine.name))
    }

    /// Reap-and-report: check the tracked child without blocking.
    fn process_state(&self, machine: &Machine) -> MachineState {
        let mut children = self.children.lock();
        match children.get_mut(&machine.name) {
            None => MachineState::Poweroff,
            Some(child) => match child.try_wait() {
                Ok(None) => MachineState::Running,
                Ok(Some(_)) => {
                    children.remove(&machine.name);
                    MachineState::Poweroff
                }
                Err(_) => MachineState::Error,
            },
        }
    }

    async fn create_overlay(&self, machine: &Machine) -> Result<PathBuf, MachineryError> {
        let base = self.base_image(machine);
        if !base.exists() {
            return Err(MachineryError::fatal(
                machine,
                format!("base image {} does not exist", base.display()),
            ));
        }
        std::fs::create_dir_all(&self.conf.disposable_dir)
            .map_err(|e| MachineryError::fatal(machine, e.to_string()))?;

        let overlay = self.overlay(machine);
        // Stale overlay from a previous run holds no state worth keeping.
        let _ = std::fs::remove_file(&overlay);

        let mut cmd = Command::new(&self.conf.qemu_img);
        cmd.args(["create", "-f", "qcow2", "-b"])
            .arg(&base)
            .args(["-F", "qcow2"])
            .arg(&overlay);
        run_checked(cmd, HYPERVISOR_TIMEOUT, "qemu-img create")
            .await
            .map_err(|e| MachineryError::transient(machine, e))?;
        Ok(overlay)
    }

    fn spawn_qemu(
        &self,
        machine: &Machine,
        overlay: &PathBuf,
        loadvm: Option<&str>,
    ) -> Result<Child, MachineryError> {
        let mut cmd = Command::new(&self.conf.qemu_system);
        cmd.arg("-name")
            .arg(machine.name.as_str())
            .arg("-m")
            .arg(self.conf.memory_mb.to_string())
            .arg("-drive")
            .arg(format!("file={},format=qcow2", overlay.display()))
            .arg("-display")
            .arg("none");
        if let Some(tag) = loadvm {
            cmd.arg("-loadvm").arg(tag);
        }
        if let (Some(interface), Some(mac)) = (&machine.interface, &machine.mac) {
            cmd.arg("-netdev")
                .arg(format!("bridge,id=net0,br={interface}"))
                .arg("-device")
                .arg(format!("virtio-net-pci,netdev=net0,mac={mac}"));
        }
        cmd.args(&self.conf.extra_args);
        cmd.kill_on_drop(true);

        debug!(machine = %machine.name, "spawning qemu-system");
        cmd.spawn()
            .map_err(|e| MachineryError::fatal(machine, format!("spawn qemu-system: {e}")))
    }
}

#[async_trait]
impl MachineryDriver for QemuDriver {
    fn name(&self) -> &'static str {
        "qemu"
    }

    fn caps(&self) -> DriverCaps {
        // acpi_stop and dump_memory would need a QMP channel.
        DriverCaps::default()
    }

    async fn restore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.process_state(machine);
        require_state(
            machine,
            "restore_start",
            "poweroff",
            actual,
            actual == MachineState::Poweroff,
        )?;

        let overlay = self.create_overlay(machine).await?;
        let snapshot = machine.snapshot.as_deref().unwrap_or("clean");
        let child = self.spawn_qemu(machine, &overlay, Some(snapshot))?;
        self.children.lock().insert(machine.name.clone(), child);
        Ok(())
    }

    async fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.process_state(machine);
        require_state(
            machine,
            "norestore_start",
            "poweroff",
            actual,
            actual == MachineState::Poweroff,
        )?;

        let overlay = self.create_overlay(machine).await?;
        let child = self.spawn_qemu(machine, &overlay, None)?;
        self.children.lock().insert(machine.name.clone(), child);
        Ok(())
    }

    async fn stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        let child = self.children.lock().remove(&machine.name);
        let Some(mut child) = child else {
            return Err(MachineryError::transient(machine, "machine already stopped"));
        };

        if let Err(e) = child.start_kill() {
            // Process may have exited between the map removal and the kill.
            warn!(machine = %machine.name, error = %e, "kill failed, reaping anyway");
        }
        let _ = child.wait().await;

        // The disposable overlay is dead weight once the guest is gone.
        let _ = std::fs::remove_file(self.overlay(machine));
        Ok(())
    }

    async fn state(&self, machine: &Machine) -> Result<MachineState, MachineryError> {
        Ok(self.process_state(machine))
    }
}

#[cfg(test)]
#[path = "qemu_tests.rs"]
mod tests;
