// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cuckoo submit file|url` - hand a target to the orchestrator.
//!
//! Submission only touches the filesystem (binary store, analysis
//! directory, untracked sentinel); a running daemon picks the sentinel up
//! within its scan interval, and a daemon started later ingests it at
//! startup.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use cuckoo_core::{CuckooCwd, Route, RouteKind, Settings, SystemClock, TaskPlatform};
use cuckoo_daemon::CuckooConfig;
use std::path::PathBuf;

#[derive(Args)]
pub struct SubmitArgs {
    #[command(subcommand)]
    pub target: SubmitTarget,
}

#[derive(Subcommand)]
pub enum SubmitTarget {
    /// Submit a file sample
    File(SubmitCommon),
    /// Submit a URL
    Url(SubmitCommon),
}

#[derive(Args)]
pub struct SubmitCommon {
    /// The file path or URL
    pub target: String,

    /// Detonation budget in seconds
    #[arg(long)]
    pub timeout: Option<u32>,

    /// Scheduling priority (higher runs first)
    #[arg(long)]
    pub priority: Option<u32>,

    /// platform/os_version pairs, e.g. windows/10 (repeatable)
    #[arg(long = "platform", value_name = "PLATFORM/VERSION")]
    pub platforms: Vec<String>,

    /// Network route: none, drop, internet, vpn
    #[arg(long)]
    pub route: Option<String>,

    /// VPN exit country (with --route vpn)
    #[arg(long)]
    pub country: Option<String>,

    /// Pause after identification for manual platform selection
    #[arg(long)]
    pub manual: bool,
}

fn parse_platform(raw: &str) -> Result<TaskPlatform> {
    let (platform, os_version) = raw
        .split_once('/')
        .with_context(|| format!("platform {raw} is not of the form platform/os_version"))?;
    Ok(TaskPlatform::new(platform, os_version))
}

fn build_settings(common: &SubmitCommon) -> Result<Settings> {
    let mut settings = Settings::default();
    if let Some(timeout) = common.timeout {
        settings.timeout = timeout;
    }
    if let Some(priority) = common.priority {
        settings.priority = priority;
    }
    settings.platforms = common
        .platforms
        .iter()
        .map(|raw| parse_platform(raw))
        .collect::<Result<Vec<_>>>()?;
    if let Some(route) = &common.route {
        let kind = RouteKind::parse(route)
            .with_context(|| format!("unknown route {route} (none, drop, internet, vpn)"))?;
        settings.route = Route {
            kind,
            country: common.country.clone(),
        };
    }
    settings.manual = common.manual;
    Ok(settings)
}

pub fn run(global_cwd: Option<PathBuf>, args: SubmitArgs) -> Result<()> {
    let cwd = CuckooCwd::resolve(global_cwd)?;
    let config = CuckooConfig::load(&cwd.conf_file("cuckoo.toml"))?;

    let id = match &args.target {
        SubmitTarget::File(common) => {
            let settings = build_settings(common)?;
            let source = PathBuf::from(&common.target);
            cuckoo_daemon::submit_file(&cwd, &config, &SystemClock, &source, settings)?
        }
        SubmitTarget::Url(common) => {
            let settings = build_settings(common)?;
            cuckoo_daemon::submit_url(&cwd, &config, &SystemClock, &common.target, settings)?
        }
    };

    println!("{id}");
    Ok(())
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
