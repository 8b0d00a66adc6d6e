// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machinery configuration files: `conf/machineries/<name>.toml`.
//!
//! One file per machinery, holding the driver settings and the machines it
//! serves. The `machine add|delete|import` CLI mutates these files.

use crate::kvm::KvmConf;
use crate::qemu::QemuConf;
use cuckoo_core::Machine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MachineryConfError {
    #[error("unknown machinery {0} (known: qemu, kvm)")]
    UnknownMachinery(String),
    #[error("machinery config {0} does not exist")]
    Missing(String),
    #[error("duplicate machine name {0}")]
    DuplicateMachine(String),
    #[error("machine {machine} belongs to machinery {got}, expected {expected}")]
    WrongMachinery {
        machine: String,
        got: String,
        expected: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// One machinery configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineryConf {
    /// Driver kind: `qemu` or `kvm`.
    pub kind: String,
    #[serde(default)]
    pub qemu: QemuConf,
    #[serde(default)]
    pub kvm: KvmConf,
    #[serde(default, rename = "machine")]
    pub machines: Vec<Machine>,
}

/// Load and validate one machinery configuration.
pub fn load_machinery_conf(path: &Path) -> Result<MachineryConf, MachineryConfError> {
    if !path.exists() {
        return Err(MachineryConfError::Missing(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)?;
    let conf: MachineryConf = toml::from_str(&raw)?;
    validate(&conf)?;
    Ok(conf)
}

/// Write a machinery configuration back out.
pub fn save_machinery_conf(path: &Path, conf: &MachineryConf) -> Result<(), MachineryConfError> {
    validate(conf)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(conf)?;
    std::fs::write(path, rendered)?;
    Ok(())
}

fn validate(conf: &MachineryConf) -> Result<(), MachineryConfError> {
    let mut seen = HashSet::new();
    for machine in &conf.machines {
        if !seen.insert(machine.name.as_str()) {
            return Err(MachineryConfError::DuplicateMachine(
                machine.name.to_string(),
            ));
        }
        if machine.machinery != conf.kind {
            return Err(MachineryConfError::WrongMachinery {
                machine: machine.name.to_string(),
                got: machine.machinery.clone(),
                expected: conf.kind.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
