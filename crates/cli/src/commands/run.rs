// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The long-running orchestrator modes.
//!
//! Default: main node with local task execution. `--distributed`: main
//! node only; tasks fan out to the nodes listed in
//! `conf/distributed.toml` and results come back over the node API.

use anyhow::{bail, Context, Result};
use cuckoo_core::CuckooCwd;
use cuckoo_daemon::{run_until_shutdown, startup, StartupOptions};
use cuckoo_node::{NodeRecord, NodeSet};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub distributed: bool,
    pub cancel_abandoned: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DistributedConf {
    #[serde(default, rename = "node")]
    nodes: Vec<NodeRecord>,
}

fn load_nodes(cwd: &CuckooCwd) -> Result<Vec<NodeRecord>> {
    let path = cwd.conf_file("distributed.toml");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path)?;
    let conf: DistributedConf =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(conf.nodes)
}

pub fn run(options: RunOptions) -> Result<()> {
    let cwd = CuckooCwd::resolve(options.cwd)?;

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(async move {
        let _log_guard = cuckoo_daemon::logging::setup_logging(&cwd)
            .context("setting up logging")?;

        let records = load_nodes(&cwd)?;
        if options.distributed && records.is_empty() {
            bail!("--distributed needs nodes in conf/distributed.toml");
        }

        // Start the daemon first; the node set needs its state and event
        // channel.
        let result = startup(StartupOptions {
            cwd: cwd.clone(),
            local_machinery: !options.distributed,
            cancel_abandoned_override: options.cancel_abandoned,
            node_dispatcher: None,
        })
        .await?;

        let daemon = result.daemon;
        if !records.is_empty() {
            let node_set = NodeSet::new(
                records,
                Arc::clone(&daemon.state),
                cwd.clone(),
                daemon.internal_tx.clone(),
            );
            node_set.spawn_pollers();
            daemon.controller.set_node_dispatcher(node_set);
        }

        run_until_shutdown(daemon, result.event_reader).await?;
        Ok(())
    })
}
