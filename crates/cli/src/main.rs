// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cuckoo - the orchestrator CLI.
//!
//! Exit codes: 0 clean, 1 configuration error, 2 runtime fatal.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod commands;
mod exit;

use clap::{Parser, Subcommand};
use commands::{createcwd, getmonitor, machine, migrate, run, submit};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cuckoo",
    version,
    about = "Cuckoo - automated malware analysis orchestrator"
)]
struct Cli {
    /// Working directory (defaults to $CUCKOO_CWD or .)
    #[arg(long, global = true, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Run as main node only; tasks execute on remote nodes
    #[arg(long)]
    distributed: bool,

    /// Override [state_control] cancel_abandoned for this run
    #[arg(long, value_name = "BOOL")]
    cancel_abandoned: Option<bool>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new working directory with default configuration
    Createcwd(createcwd::CreatecwdArgs),
    /// Unpack a monitor/stager archive into the working directory
    Getmonitor(getmonitor::GetmonitorArgs),
    /// Submit a file or URL for analysis
    Submit(submit::SubmitArgs),
    /// Manage configured machines
    Machine(machine::MachineArgs),
    /// Database maintenance
    Migrate(migrate::MigrateArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Createcwd(args)) => createcwd::run(cli.cwd, args),
        Some(Commands::Getmonitor(args)) => getmonitor::run(cli.cwd, args),
        Some(Commands::Submit(args)) => submit::run(cli.cwd, args),
        Some(Commands::Machine(args)) => machine::run(cli.cwd, args),
        Some(Commands::Migrate(args)) => migrate::run(cli.cwd, args),
        // No subcommand: run the orchestrator itself.
        None => run::run(run::RunOptions {
            cwd: cli.cwd,
            distributed: cli.distributed,
            cancel_abandoned: cli.cancel_abandoned,
        }),
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("cuckoo: {e:#}");
            std::process::exit(exit::code_for(&e));
        }
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
