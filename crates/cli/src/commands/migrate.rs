// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cuckoo migrate database all` - upgrade the state store schema.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use cuckoo_core::CuckooCwd;
use cuckoo_storage::{load_snapshot, Snapshot, CURRENT_SNAPSHOT_VERSION};
use std::path::PathBuf;

#[derive(Args)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub what: MigrateWhat,
}

#[derive(Subcommand)]
pub enum MigrateWhat {
    /// Migrate the embedded state database
    Database {
        /// What to migrate (only `all` is supported)
        scope: String,
    },
}

pub fn run(global_cwd: Option<PathBuf>, args: MigrateArgs) -> Result<()> {
    let cwd = CuckooCwd::resolve(global_cwd)?;

    let MigrateWhat::Database { scope } = args.what;
    if scope != "all" {
        bail!("unknown migrate scope {scope} (expected `all`)");
    }

    let db_path = cwd.state_db_path();
    // load_snapshot runs the migration chain; rewriting persists it.
    let Some(snapshot) = load_snapshot(&db_path).context("loading state database")? else {
        println!("no state database yet, nothing to migrate");
        return Ok(());
    };

    let migrated = Snapshot {
        v: CURRENT_SNAPSHOT_VERSION,
        ..snapshot
    };
    migrated.save(&db_path)?;
    println!(
        "state database at schema v{} (seq {})",
        CURRENT_SNAPSHOT_VERSION, migrated.seq
    );
    Ok(())
}

#[cfg(test)]
#[path = "migrate_tests.rs"]
mod tests;
