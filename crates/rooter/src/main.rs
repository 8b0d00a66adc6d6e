// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cuckoorooter - the privileged route helper.
//!
//! Runs as root (or with CAP_NET_ADMIN), listens on a Unix socket for the
//! unprivileged orchestrator, and applies per-task network routes.

use clap::Parser;
use cuckoo_rooter::actions::{RoutingConf, ShellRunner, ToolPaths};
use cuckoo_rooter::server::RooterServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cuckoorooter",
    version,
    about = "Privileged network route helper for the Cuckoo orchestrator"
)]
struct Cli {
    /// Path of the Unix socket to listen on
    socket: PathBuf,

    /// Path to the iptables binary
    #[arg(long, default_value = "/usr/sbin/iptables")]
    iptables: PathBuf,

    /// Path to the ip binary
    #[arg(long, default_value = "/usr/sbin/ip")]
    ip: PathBuf,

    /// Path to the openvpn binary
    #[arg(long, default_value = "/usr/sbin/openvpn")]
    openvpn: PathBuf,

    /// Group granted read/write on the socket
    #[arg(long)]
    group: Option<String>,

    /// Routing configuration file
    #[arg(long, default_value = "conf/routing.toml")]
    conf: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // CUCKOO_LOGLEVEL uses the original DEBUG|INFO|WARNING|ERROR names.
    let level = match std::env::var("CUCKOO_LOGLEVEL").ok().as_deref() {
        Some("DEBUG") => "debug",
        Some("WARNING") => "warn",
        Some("ERROR") => "error",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    let conf = match RoutingConf::load(&cli.conf) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("cuckoorooter: cannot load {}: {e}", cli.conf.display());
            std::process::exit(1);
        }
    };

    let tools = ToolPaths {
        iptables: cli.iptables,
        ip: cli.ip,
        openvpn: cli.openvpn,
    };

    let server = match RooterServer::bind(
        &cli.socket,
        cli.group.as_deref(),
        conf,
        tools,
        Arc::new(ShellRunner),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            eprintln!("cuckoorooter: {e}");
            std::process::exit(1);
        }
    };

    server.run().await;
}
