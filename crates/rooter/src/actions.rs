// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell sequences behind each route kind, with rollback planning.
//!
//! A route apply is planned as a list of commands plus the matching undo
//! list. Execution is fail-closed: if step N errors, the undo commands for
//! steps 1..N run in reverse order and the caller sees no partial route.

use cuckoo_core::{Route, RouteKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Wall timeout for each individual shell step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("route {0} is not enabled on this rooter")]
    RouteNotEnabled(RouteKind),
    #[error("no vpn configured for country {0}")]
    NoSuchVpnCountry(String),
    #[error("no vpns configured")]
    NoVpns,
    #[error("{step}: {message}")]
    StepFailed { step: String, message: String },
}

/// Runs one external command. Abstracted so the server logic is testable
/// without touching iptables.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> Result<(), String>;
}

/// Production runner shelling out with a per-step timeout.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<(), String> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        let description = format!("{} {}", program.display(), args.join(" "));
        let output = match tokio::time::timeout(STEP_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("{description} failed: {e}")),
            Err(_) => {
                return Err(format!(
                    "{description} timed out after {}s",
                    STEP_TIMEOUT.as_secs()
                ))
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{description} exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }
}

/// One VPN endpoint from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnConf {
    pub name: String,
    pub config_path: PathBuf,
    pub country: String,
    /// Policy routing table packets from routed guests are sent through.
    pub routing_table: String,
}

/// Rooter configuration (`conf/routing.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConf {
    /// Route kinds this rooter honors. Only listed routes are applied.
    #[serde(default)]
    pub enabled: BTreeSet<RouteKind>,
    /// Outgoing interface for the internet (dirty line) route.
    #[serde(default)]
    pub internet_interface: Option<String>,
    /// Policy routing table for the internet route.
    #[serde(default = "default_internet_table")]
    pub internet_table: String,
    #[serde(default, rename = "vpn")]
    pub vpns: Vec<VpnConf>,
    /// Directory for OpenVPN pid files.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
}

fn default_internet_table() -> String {
    "main".to_string()
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("/run/cuckoo-rooter")
}

impl RoutingConf {
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(std::io::Error::other)
    }

    /// Routes this configuration can actually serve. `vpn` drops out when
    /// no VPN endpoints exist, whatever `enabled` claims.
    pub fn available_routes(&self) -> BTreeSet<RouteKind> {
        self.enabled
            .iter()
            .copied()
            .filter(|kind| *kind != RouteKind::Vpn || !self.vpns.is_empty())
            .collect()
    }

    pub fn vpn_countries(&self) -> BTreeSet<String> {
        self.vpns.iter().map(|v| v.country.clone()).collect()
    }
}

impl Default for RoutingConf {
    fn default() -> Self {
        Self {
            enabled: BTreeSet::new(),
            internet_interface: None,
            internet_table: default_internet_table(),
            vpns: Vec::new(),
            run_dir: default_run_dir(),
        }
    }
}

/// One planned shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Cmd {
    fn new(program: &Path, args: &[&str]) -> Self {
        Self {
            program: program.to_path_buf(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Paths of the privileged binaries, from the cuckoorooter CLI.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub iptables: PathBuf,
    pub ip: PathBuf,
    pub openvpn: PathBuf,
}

/// A planned route: apply steps and their undo mirror. `undo[i]` reverses
/// `apply[i]`.
#[derive(Debug, Clone, Default)]
pub struct RoutePlan {
    pub apply: Vec<Cmd>,
    pub undo: Vec<Cmd>,
}

/// Build the shell plan for a route request.
pub fn plan_route(
    route: &Route,
    source_ip: IpAddr,
    handle: &str,
    conf: &RoutingConf,
    tools: &ToolPaths,
) -> Result<RoutePlan, ActionError> {
    if !conf.available_routes().contains(&route.kind) {
        return Err(ActionError::RouteNotEnabled(route.kind));
    }
    let ip = source_ip.to_string();
    let mut plan = RoutePlan::default();

    match route.kind {
        RouteKind::None => {}
        RouteKind::Drop => {
            plan.push(
                Cmd::new(&tools.iptables, &["-I", "FORWARD", "-s", &ip, "-j", "DROP"]),
                Cmd::new(&tools.iptables, &["-D", "FORWARD", "-s", &ip, "-j", "DROP"]),
            );
            plan.push(
                Cmd::new(&tools.iptables, &["-I", "FORWARD", "-d", &ip, "-j", "DROP"]),
                Cmd::new(&tools.iptables, &["-D", "FORWARD", "-d", &ip, "-j", "DROP"]),
            );
        }
        RouteKind::Internet => {
            let out = conf
                .internet_interface
                .as_deref()
                .ok_or(ActionError::RouteNotEnabled(RouteKind::Internet))?;
            plan.push(
                Cmd::new(
                    &tools.iptables,
                    &["-t", "nat", "-I", "POSTROUTING", "-s", &ip, "-o", out, "-j", "MASQUERADE"],
                ),
                Cmd::new(
                    &tools.iptables,
                    &["-t", "nat", "-D", "POSTROUTING", "-s", &ip, "-o", out, "-j", "MASQUERADE"],
                ),
            );
            plan.push(
                Cmd::new(
                    &tools.iptables,
                    &["-I", "FORWARD", "-s", &ip, "-o", out, "-j", "ACCEPT"],
                ),
                Cmd::new(
                    &tools.iptables,
                    &["-D", "FORWARD", "-s", &ip, "-o", out, "-j", "ACCEPT"],
                ),
            );
            plan.push(
                Cmd::new(
                    &tools.iptables,
                    &["-I", "FORWARD", "-d", &ip, "-i", out, "-j", "ACCEPT"],
                ),
                Cmd::new(
                    &tools.iptables,
                    &["-D", "FORWARD", "-d", &ip, "-i", out, "-j", "ACCEPT"],
                ),
            );
            plan.push(
                Cmd::new(
                    &tools.ip,
                    &["rule", "add", "from", &ip, "lookup", &conf.internet_table],
                ),
                Cmd::new(
                    &tools.ip,
                    &["rule", "del", "from", &ip, "lookup", &conf.internet_table],
                ),
            );
        }
        RouteKind::Vpn => {
            let vpn = match &route.country {
                Some(country) => conf
                    .vpns
                    .iter()
                    .find(|v| &v.country == country)
                    .ok_or_else(|| ActionError::NoSuchVpnCountry(country.clone()))?,
                None => conf.vpns.first().ok_or(ActionError::NoVpns)?,
            };
            let pid_file = conf.run_dir.join(format!("openvpn-{handle}.pid"));
            let pid = pid_file.display().to_string();
            let config = vpn.config_path.display().to_string();
            plan.push(
                Cmd::new(
                    &tools.openvpn,
                    &["--config", &config, "--daemon", "--writepid", &pid],
                ),
                Cmd::new(Path::new("/usr/bin/pkill"), &["-F", &pid]),
            );
            plan.push(
                Cmd::new(
                    &tools.ip,
                    &["rule", "add", "from", &ip, "lookup", &vpn.routing_table],
                ),
                Cmd::new(
                    &tools.ip,
                    &["rule", "del", "from", &ip, "lookup", &vpn.routing_table],
                ),
            );
        }
    }
    Ok(plan)
}

impl RoutePlan {
    fn push(&mut self, apply: Cmd, undo: Cmd) {
        self.apply.push(apply);
        self.undo.push(undo);
    }
}

/// Execute a plan fail-closed. On step failure, undo the completed prefix
/// in reverse order and return the error.
pub async fn execute_plan(
    runner: &dyn CommandRunner,
    plan: &RoutePlan,
) -> Result<(), ActionError> {
    for (i, step) in plan.apply.iter().enumerate() {
        debug!(program = %step.program.display(), args = ?step.args, "route step");
        if let Err(message) = runner.run(&step.program, &step.args).await {
            warn!(step = i, %message, "route step failed, rolling back");
            for undo in plan.undo[..i].iter().rev() {
                if let Err(undo_err) = runner.run(&undo.program, &undo.args).await {
                    warn!(%undo_err, "rollback step failed");
                }
            }
            return Err(ActionError::StepFailed {
                step: format!("{} {}", step.program.display(), step.args.join(" ")),
                message,
            });
        }
    }
    Ok(())
}

/// Execute an undo list in reverse. Failures are logged, not propagated:
/// removal must be idempotent from the caller's point of view.
pub async fn execute_undo(runner: &dyn CommandRunner, undo: &[Cmd]) {
    for step in undo.iter().rev() {
        if let Err(message) = runner.run(&step.program, &step.args).await {
            warn!(%message, "route removal step failed");
        }
    }
}

#[cfg(test)]
#[path = "actions_tests.rs"]
mod tests;
