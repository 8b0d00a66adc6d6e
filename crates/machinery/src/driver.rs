// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The machinery driver contract.
//!
//! Drivers map hypervisor-specific states onto the normalized set
//! `{Poweroff, Running, Suspended, Error}`; `Restoring`/`Stopping` belong
//! to the pool. Optional operations are advertised through `capabilities()`
//! so callers skip what a driver cannot do instead of catching errors.

use async_trait::async_trait;
use cuckoo_core::{ErrorKind, Fault, Machine, MachineState};
use std::path::Path;
use thiserror::Error;

/// Failures from driver operations, split by recoverability.
#[derive(Debug, Error)]
pub enum MachineryError {
    /// Retrying the same operation may succeed; the machine is intact.
    #[error("transient machinery failure on {machine}: {message}")]
    Transient { machine: String, message: String },

    /// The VM may be in an inconsistent state; the pool must disable it.
    #[error("fatal machinery failure on {machine}: {message}")]
    Fatal { machine: String, message: String },

    /// The operation's precondition did not hold; the driver refused.
    #[error("invalid state for {op} on {machine}: expected {expected}, was {actual}")]
    InvalidState {
        machine: String,
        op: &'static str,
        expected: &'static str,
        actual: MachineState,
    },

    /// The driver does not implement this optional operation.
    #[error("{op} is not supported by the {machinery} machinery")]
    Unsupported {
        machinery: &'static str,
        op: &'static str,
    },
}

impl MachineryError {
    pub fn transient(machine: &Machine, message: impl Into<String>) -> Self {
        Self::Transient {
            machine: machine.name.to_string(),
            message: message.into(),
        }
    }

    pub fn fatal(machine: &Machine, message: impl Into<String>) -> Self {
        Self::Fatal {
            machine: machine.name.to_string(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MachineryError::Fatal { .. } | MachineryError::InvalidState { .. }
        )
    }

    /// Classify into the orchestrator-wide error taxonomy.
    pub fn to_fault(&self) -> Fault {
        let kind = if self.is_fatal() {
            ErrorKind::MachineryFatal
        } else {
            ErrorKind::MachineryTransient
        };
        Fault::new(kind, self.to_string())
    }
}

/// Which optional operations a driver implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverCaps {
    pub acpi_stop: bool,
    pub dump_memory: bool,
    pub handle_paused: bool,
}

/// Lifecycle contract for one hypervisor kind.
///
/// Precondition discipline: `restore_start`/`norestore_start` require the
/// caller observed `Poweroff`; `stop` and `acpi_stop` require
/// `Running | Suspended`. Drivers verify and refuse with `InvalidState`
/// rather than attempt. A `stop` that finds the VM already off reports
/// a transient error (idempotent from the pool's point of view).
#[async_trait]
pub trait MachineryDriver: Send + Sync {
    /// Machinery name as used in configuration (`qemu`, `kvm`).
    fn name(&self) -> &'static str;

    /// Optional-operation advertisement.
    fn caps(&self) -> DriverCaps;

    /// Restore the machine to its snapshot and start it, on a disposable
    /// disk copy where the hypervisor supports one.
    async fn restore_start(&self, machine: &Machine) -> Result<(), MachineryError>;

    /// Start without restoring (the current disk/memory state is used).
    async fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError>;

    /// Hard power-off; the disposable disk is discarded.
    async fn stop(&self, machine: &Machine) -> Result<(), MachineryError>;

    /// Graceful ACPI shutdown. Optional; gate on `caps().acpi_stop`.
    async fn acpi_stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        let _ = machine;
        Err(MachineryError::Unsupported {
            machinery: self.name(),
            op: "acpi_stop",
        })
    }

    /// Normalized current state as the hypervisor reports it.
    async fn state(&self, machine: &Machine) -> Result<MachineState, MachineryError>;

    /// Dump guest memory to `dest`. Optional; gate on `caps().dump_memory`.
    async fn dump_memory(&self, machine: &Machine, dest: &Path) -> Result<(), MachineryError> {
        let _ = (machine, dest);
        Err(MachineryError::Unsupported {
            machinery: self.name(),
            op: "dump_memory",
        })
    }

    /// Resume a machine the hypervisor left paused after restore.
    /// Optional; gate on `caps().handle_paused`.
    async fn handle_paused(&self, machine: &Machine) -> Result<(), MachineryError> {
        let _ = machine;
        Err(MachineryError::Unsupported {
            machinery: self.name(),
            op: "handle_paused",
        })
    }
}

/// Shared precondition check for start operations.
pub(crate) fn require_state(
    machine: &Machine,
    op: &'static str,
    expected: &'static str,
    actual: MachineState,
    ok: bool,
) -> Result<(), MachineryError> {
    if ok {
        Ok(())
    } else {
        Err(MachineryError::InvalidState {
            machine: machine.name.to_string(),
            op,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
