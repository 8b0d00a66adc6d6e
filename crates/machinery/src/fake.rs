// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-memory driver for tests.
//!
//! Tracks per-machine state, records every call, and can be told to fail
//! the next N restores or stops so failure paths are exercised without a
//! hypervisor.

use crate::driver::{require_state, DriverCaps, MachineryDriver, MachineryError};
use async_trait::async_trait;
use cuckoo_core::{Machine, MachineName, MachineState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    RestoreStart(MachineName),
    NorestoreStart(MachineName),
    Stop(MachineName),
    AcpiStop(MachineName),
    State(MachineName),
    DumpMemory(MachineName),
    HandlePaused(MachineName),
}

#[derive(Default)]
struct FakeInner {
    states: HashMap<MachineName, MachineState>,
    calls: Vec<FakeCall>,
    fail_restores: u32,
    fail_stops: u32,
    fatal_failures: bool,
    dump_supported: bool,
    paused_supported: bool,
    /// Restores leave the machine suspended instead of running.
    restore_pauses: bool,
}

/// In-memory machinery for deterministic tests.
#[derive(Clone, Default)]
pub struct FakeDriver {
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` restore_start calls fail (transient by default).
    pub fn fail_next_restores(&self, n: u32) {
        self.inner.lock().fail_restores = n;
    }

    pub fn fail_next_stops(&self, n: u32) {
        self.inner.lock().fail_stops = n;
    }

    /// Scripted failures become fatal instead of transient.
    pub fn make_failures_fatal(&self) {
        self.inner.lock().fatal_failures = true;
    }

    /// Advertise and implement `dump_memory`.
    pub fn support_dump_memory(&self) {
        self.inner.lock().dump_supported = true;
    }

    /// Advertise and implement `handle_paused`.
    pub fn support_handle_paused(&self) {
        self.inner.lock().paused_supported = true;
    }

    /// Restores leave the machine suspended, as some hypervisors do.
    pub fn restore_leaves_paused(&self) {
        self.inner.lock().restore_pauses = true;
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.inner.lock().calls.clone()
    }

    pub fn restore_count(&self, name: &MachineName) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, FakeCall::RestoreStart(n) if n == name))
            .count()
    }

    fn fail(&self, machine: &Machine, message: &str, fatal: bool) -> MachineryError {
        if fatal {
            MachineryError::fatal(machine, message)
        } else {
            MachineryError::transient(machine, message)
        }
    }

    fn current(&self, name: &MachineName) -> MachineState {
        self.inner
            .lock()
            .states
            .get(name)
            .copied()
            .unwrap_or(MachineState::Poweroff)
    }
}

#[async_trait]
impl MachineryDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn caps(&self) -> DriverCaps {
        let inner = self.inner.lock();
        DriverCaps {
            acpi_stop: true,
            dump_memory: inner.dump_supported,
            handle_paused: inner.paused_supported,
        }
    }

    async fn restore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.current(&machine.name);
        {
            let mut inner = self.inner.lock();
            inner.calls.push(FakeCall::RestoreStart(machine.name.clone()));
        }
        require_state(
            machine,
            "restore_start",
            "poweroff",
            actual,
            actual == MachineState::Poweroff,
        )?;

        let fatal = {
            let mut inner = self.inner.lock();
            if inner.fail_restores > 0 {
                inner.fail_restores -= 1;
                Some(inner.fatal_failures)
            } else {
                None
            }
        };
        if let Some(fatal) = fatal {
            return Err(self.fail(machine, "scripted restore failure", fatal));
        }

        let mut inner = self.inner.lock();
        let restored = if inner.restore_pauses {
            MachineState::Suspended
        } else {
            MachineState::Running
        };
        inner.states.insert(machine.name.clone(), restored);
        Ok(())
    }

    async fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.current(&machine.name);
        self.inner
            .lock()
            .calls
            .push(FakeCall::NorestoreStart(machine.name.clone()));
        require_state(
            machine,
            "norestore_start",
            "poweroff",
            actual,
            actual == MachineState::Poweroff,
        )?;
        self.inner
            .lock()
            .states
            .insert(machine.name.clone(), MachineState::Running);
        Ok(())
    }

    async fn stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        let actual = self.current(&machine.name);
        self.inner.lock().calls.push(FakeCall::Stop(machine.name.clone()));
        if actual == MachineState::Poweroff {
            return Err(MachineryError::transient(machine, "already stopped"));
        }

        let fatal = {
            let mut inner = self.inner.lock();
            if inner.fail_stops > 0 {
                inner.fail_stops -= 1;
                Some(inner.fatal_failures)
            } else {
                None
            }
        };
        if let Some(fatal) = fatal {
            return Err(self.fail(machine, "scripted stop failure", fatal));
        }

        self.inner
            .lock()
            .states
            .insert(machine.name.clone(), MachineState::Poweroff);
        Ok(())
    }

    async fn acpi_stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        self.inner
            .lock()
            .calls
            .push(FakeCall::AcpiStop(machine.name.clone()));
        self.stop(machine).await
    }

    async fn state(&self, machine: &Machine) -> Result<MachineState, MachineryError> {
        self.inner.lock().calls.push(FakeCall::State(machine.name.clone()));
        Ok(self.current(&machine.name))
    }

    async fn dump_memory(&self, machine: &Machine, dest: &Path) -> Result<(), MachineryError> {
        let supported = {
            let mut inner = self.inner.lock();
            inner.calls.push(FakeCall::DumpMemory(machine.name.clone()));
            inner.dump_supported
        };
        if !supported {
            return Err(MachineryError::Unsupported {
                machinery: self.name(),
                op: "dump_memory",
            });
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MachineryError::transient(machine, e.to_string()))?;
        }
        std::fs::write(dest, b"MEMDUMP")
            .map_err(|e| MachineryError::transient(machine, e.to_string()))?;
        Ok(())
    }

    async fn handle_paused(&self, machine: &Machine) -> Result<(), MachineryError> {
        let supported = {
            let mut inner = self.inner.lock();
            inner.calls.push(FakeCall::HandlePaused(machine.name.clone()));
            inner.paused_supported
        };
        if !supported {
            return Err(MachineryError::Unsupported {
                machinery: self.name(),
                op: "handle_paused",
            });
        }
        self.inner
            .lock()
            .states
            .insert(machine.name.clone(), MachineState::Running);
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
