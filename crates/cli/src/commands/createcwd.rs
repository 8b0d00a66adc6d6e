// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cuckoo createcwd` - materialize a fresh working directory.

use anyhow::{bail, Context, Result};
use clap::Args;
use cuckoo_core::CuckooCwd;
use cuckoo_daemon::CuckooConfig;
use std::path::PathBuf;

#[derive(Args)]
pub struct CreatecwdArgs {
    /// Directory to create (defaults to the --cwd/$CUCKOO_CWD target)
    pub path: Option<PathBuf>,

    /// Rewrite default configuration files in an existing cwd
    #[arg(long)]
    pub regen_configs: bool,
}

pub fn run(global_cwd: Option<PathBuf>, args: CreatecwdArgs) -> Result<()> {
    let root = args
        .path
        .or(global_cwd)
        .or_else(|| std::env::var_os(cuckoo_core::cwd::CWD_ENV).map(PathBuf::from))
        .context("no directory given (pass a path or set CUCKOO_CWD)")?;

    let cwd = CuckooCwd::at(&root);
    let conf_path = cwd.conf_file("cuckoo.toml");

    if conf_path.exists() && !args.regen_configs {
        bail!(
            "{} already is a cuckoo working directory (use --regen-configs to rewrite configs)",
            root.display()
        );
    }

    cwd.create_tree()
        .with_context(|| format!("creating {}", root.display()))?;
    CuckooConfig::write_default(&conf_path)?;

    println!("created cuckoo working directory at {}", root.display());
    println!("next: configure a machinery under conf/machineries/ and run `cuckoo`");
    Ok(())
}

#[cfg(test)]
#[path = "createcwd_tests.rs"]
mod tests;
