// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cuckoo getmonitor` - unpack a monitor/stager archive into the cwd.
//!
//! The monitor payloads themselves come from a separate release channel;
//! this command only installs a `.tar.zst` archive of them under
//! `monitor/` so task runners can deliver them to guests.

use anyhow::{bail, Context, Result};
use clap::Args;
use cuckoo_core::CuckooCwd;
use std::path::PathBuf;

#[derive(Args)]
pub struct GetmonitorArgs {
    /// Path to the monitor archive (.tar.zst)
    pub archive: PathBuf,
}

pub fn run(global_cwd: Option<PathBuf>, args: GetmonitorArgs) -> Result<()> {
    let cwd = CuckooCwd::resolve(global_cwd)?;

    if !args.archive.is_file() {
        bail!("{} does not exist", args.archive.display());
    }

    let file = std::fs::File::open(&args.archive)
        .with_context(|| format!("opening {}", args.archive.display()))?;
    let decoder = zstd::stream::read::Decoder::new(file)
        .with_context(|| format!("{} is not a zstd archive", args.archive.display()))?;
    let mut archive = tar::Archive::new(decoder);

    let dest = cwd.monitor_dir();
    std::fs::create_dir_all(&dest)?;
    archive
        .unpack(&dest)
        .with_context(|| format!("unpacking into {}", dest.display()))?;

    println!("monitor unpacked into {}", dest.display());
    Ok(())
}

#[cfg(test)]
#[path = "getmonitor_tests.rs"]
mod tests;
