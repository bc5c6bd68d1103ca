//! `tasksync daemon`: polling service lifecycle.

use anyhow::{Context, Result};
use clap::Subcommand;

use tasksync_daemon::paths::socket_path;
use tasksync_daemon::{
    request_status, request_stop, request_sync, start_blocking, DaemonError, DaemonOptions,
};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (poll loop + liveness + socket).
    Start {
        /// Log pages that would be created instead of creating them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Request graceful shutdown over the Unix socket.
    Stop,
    /// Query runtime status over the Unix socket.
    Status,
    /// Run a cycle now and print its report.
    Sync,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start { dry_run } => {
            start_blocking(&home, DaemonOptions { dry_run }).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Sync => {
            let summary = request_sync(&home).context("daemon sync failed")?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
