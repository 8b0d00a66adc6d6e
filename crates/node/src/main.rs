// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cuckoonode - a task-running node.
//!
//! Runs the task-execution half of the orchestrator (machinery pool,
//! result server, task runners, post-processing) behind the node HTTP
//! API, without any submission intake of its own. The main node
//! dispatches tasks over the API and pulls results back.

use clap::Parser;
use cuckoo_daemon::{run_until_shutdown, startup, StartupOptions};
use cuckoo_node::NodeApi;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "cuckoonode",
    version,
    about = "Cuckoo task-running node"
)]
struct Cli {
    /// Address the node API listens on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port the node API listens on
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// Working directory (defaults to $CUCKOO_CWD or .)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// API key main nodes must present
    #[arg(long)]
    key: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cwd = match cuckoo_core::CuckooCwd::resolve(cli.cwd) {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("cuckoonode: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = match cuckoo_daemon::logging::setup_logging(&cwd) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cuckoonode: cannot set up logging: {e}");
            std::process::exit(1);
        }
    };

    let result = startup(StartupOptions {
        cwd,
        local_machinery: true,
        cancel_abandoned_override: None,
        node_dispatcher: None,
    })
    .await;

    let startup_result = match result {
        Ok(result) => result,
        Err(e) => {
            eprintln!("cuckoonode: {e}");
            let code = match e {
                cuckoo_daemon::LifecycleError::Config(_) => 1,
                _ => 2,
            };
            std::process::exit(code);
        }
    };

    let api = NodeApi {
        pool: startup_result.daemon.pool.clone(),
        state: Arc::clone(&startup_result.daemon.state),
        cwd: startup_result.daemon.cwd.clone(),
        event_tx: startup_result.daemon.internal_tx.clone(),
        api_key: Arc::new(cli.key),
    };
    let addr = SocketAddr::new(cli.host, cli.port);
    tokio::spawn(async move {
        if let Err(e) = api.serve(addr).await {
            tracing::error!(error = %e, "node api failed");
            std::process::exit(2);
        }
    });

    if let Err(e) = run_until_shutdown(startup_result.daemon, startup_result.event_reader).await {
        eprintln!("cuckoonode: {e}");
        std::process::exit(2);
    }
}
