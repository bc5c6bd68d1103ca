//! tasksync: mirror new Notion tasks from one database into another.
//!
//! # Usage
//!
//! ```text
//! tasksync init --source <id> --target <id> --assignee <name> [--interval N] [--port N] [--force]
//! tasksync fetch [--json]
//! tasksync run [--dry-run]
//! tasksync daemon start [--dry-run] | stop | status | sync
//! ```
//!
//! The Notion token is read from `NOTION_API_KEY`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, fetch::FetchArgs, init::InitArgs, run::RunArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tasksync",
    version,
    about = "Propagate newly created Notion tasks into a second database",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.tasksync/config.yaml.
    Init(InitArgs),

    /// Print the current contents of the source database.
    Fetch(FetchArgs),

    /// Check configuration and connectivity with one seed-and-diff pass.
    ///
    /// Pages that exist when the seed is taken are never propagated, so this
    /// normally reports no new records. Use `tasksync daemon start` for
    /// continuous sync.
    Run(RunArgs),

    /// Run or control the polling daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Fetch(args) => args.run(),
        Commands::Run(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
