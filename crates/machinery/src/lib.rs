// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cuckoo-machinery: hypervisor drivers and the machine pool.
//!
//! A machinery driver owns the lifecycle of one VM kind (restore, stop,
//! state, optional memory dump) behind a uniform contract. Drivers are an
//! enumerated set selected by name from configuration; unknown names fail
//! at startup, not at task time.

pub mod config;
pub mod driver;
pub mod kvm;
pub mod pool;
pub mod qemu;
pub mod subprocess;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use config::{load_machinery_conf, save_machinery_conf, MachineryConf, MachineryConfError};
pub use driver::{DriverCaps, MachineryDriver, MachineryError};
pub use kvm::KvmDriver;
pub use pool::MachinePool;
pub use qemu::QemuDriver;

use std::sync::Arc;

/// Instantiate a driver by its configured name.
///
/// The enumerated set replaces runtime class loading: an unknown machinery
/// name is a configuration error surfaced before any task runs.
pub fn driver_from_name(
    kind: &str,
    conf: &MachineryConf,
) -> Result<Arc<dyn MachineryDriver>, MachineryConfError> {
    match kind {
        "qemu" => Ok(Arc::new(QemuDriver::new(conf.qemu.clone()))),
        "kvm" => Ok(Arc::new(KvmDriver::new(conf.kvm.clone()))),
        #[cfg(any(test, feature = "test-support"))]
        "fake" => Ok(Arc::new(fake::FakeDriver::new())),
        other => Err(MachineryConfError::UnknownMachinery(other.to_string())),
    }
}
