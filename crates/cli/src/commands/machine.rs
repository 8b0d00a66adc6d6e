// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cuckoo machine add|delete|import` - edit machinery configuration.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use cuckoo_core::{CuckooCwd, Machine, MachineName, MachineState};
use cuckoo_machinery::{load_machinery_conf, save_machinery_conf};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Args)]
pub struct MachineArgs {
    #[command(subcommand)]
    pub action: MachineAction,
}

#[derive(Subcommand)]
pub enum MachineAction {
    /// Add a machine to a machinery configuration
    Add(AddArgs),
    /// Delete a machine from a machinery configuration
    Delete {
        /// Machinery the machine belongs to
        machinery: String,
        /// Machine name
        name: String,
    },
    /// Import machines from another machinery TOML file
    Import {
        /// Machinery to import into
        machinery: String,
        /// Path of the TOML file to import
        path: PathBuf,
    },
}

#[derive(Args)]
pub struct AddArgs {
    /// Machinery the machine belongs to
    pub machinery: String,
    /// Machine name (the hypervisor domain/image name)
    pub name: String,

    #[arg(long)]
    pub ip: IpAddr,
    #[arg(long)]
    pub platform: String,
    #[arg(long)]
    pub os_version: String,
    #[arg(long, default_value = "amd64")]
    pub architecture: String,
    #[arg(long, default_value_t = 8000)]
    pub agent_port: u16,
    /// Capability tags (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub mac: Option<String>,
    #[arg(long)]
    pub interface: Option<String>,
    /// Snapshot to restore before each detonation
    #[arg(long)]
    pub snapshot: Option<String>,
}

pub fn run(global_cwd: Option<PathBuf>, args: MachineArgs) -> Result<()> {
    let cwd = CuckooCwd::resolve(global_cwd)?;

    match args.action {
        MachineAction::Add(add) => {
            let conf_path = cwd.machinery_conf(&add.machinery);
            let mut conf = load_machinery_conf(&conf_path)
                .with_context(|| format!("loading machinery {}", add.machinery))?;

            if conf.machines.iter().any(|m| m.name == add.name.as_str()) {
                bail!("machine {} already exists in {}", add.name, add.machinery);
            }

            conf.machines.push(Machine {
                name: MachineName::new(&add.name),
                label: None,
                ip: add.ip,
                platform: add.platform,
                os_version: add.os_version,
                architecture: add.architecture,
                agent_port: add.agent_port,
                tags: add.tags.into_iter().collect(),
                mac: add.mac,
                interface: add.interface,
                snapshot: add.snapshot,
                machinery: conf.kind.clone(),
                state: MachineState::Poweroff,
                reserved_by: None,
                locked_by: None,
                disabled_reason: None,
                last_used_ms: 0,
            });
            save_machinery_conf(&conf_path, &conf)?;
            println!("added {} to {}", add.name, add.machinery);
        }
        MachineAction::Delete { machinery, name } => {
            let conf_path = cwd.machinery_conf(&machinery);
            let mut conf = load_machinery_conf(&conf_path)
                .with_context(|| format!("loading machinery {machinery}"))?;

            let before = conf.machines.len();
            conf.machines.retain(|m| m.name != name.as_str());
            if conf.machines.len() == before {
                bail!("no machine named {name} in {machinery}");
            }
            save_machinery_conf(&conf_path, &conf)?;
            println!("deleted {name} from {machinery}");
        }
        MachineAction::Import { machinery, path } => {
            let conf_path = cwd.machinery_conf(&machinery);
            let mut conf = load_machinery_conf(&conf_path)
                .with_context(|| format!("loading machinery {machinery}"))?;
            let imported = load_machinery_conf(&path)
                .with_context(|| format!("loading import file {}", path.display()))?;

            if imported.kind != conf.kind {
                bail!(
                    "cannot import {} machines into the {} machinery",
                    imported.kind,
                    conf.kind
                );
            }

            let mut added = 0;
            for machine in imported.machines {
                if conf.machines.iter().any(|m| m.name == machine.name) {
                    println!("skipping {} (already present)", machine.name);
                    continue;
                }
                conf.machines.push(machine);
                added += 1;
            }
            save_machinery_conf(&conf_path, &conf)?;
            println!("imported {added} machine(s) into {machinery}");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
