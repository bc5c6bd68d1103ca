//! `tasksync init --source <id> --target <id> --assignee <name>`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tasksync_core::config::{self, DEFAULT_LIVENESS_PORT, DEFAULT_POLL_INTERVAL_SECS};
use tasksync_core::{Config, DatabaseId};

use super::home_dir;

/// Write the config file. The token is never stored; export `NOTION_API_KEY`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Database whose new pages are watched.
    #[arg(long, short = 's')]
    pub source: String,

    /// Database that receives copies of qualifying pages.
    #[arg(long, short = 't')]
    pub target: String,

    /// Person name that must appear in a page's Assignee list.
    #[arg(long, short = 'a')]
    pub assignee: String,

    /// Seconds between polls.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub interval: u64,

    /// TCP port of the liveness listener.
    #[arg(long, default_value_t = DEFAULT_LIVENESS_PORT)]
    pub port: u16,

    /// Replace an existing config file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config::config_path_at(&home);
        let existed = path.exists();

        let requested = Config {
            source_database: DatabaseId::from(self.source),
            target_database: DatabaseId::from(self.target),
            assignee: self.assignee,
            poll_interval_secs: self.interval,
            liveness_port: self.port,
            ..Config::default()
        };
        let written = config::init_at(&home, requested, self.force)
            .with_context(|| format!("failed to write {}", path.display()))?;

        if existed && !self.force {
            println!(
                "{} config already exists at {} (use --force to replace)",
                "!".yellow(),
                path.display()
            );
        } else {
            println!("{} Wrote {}", "✓".green(), path.display());
        }
        println!("  source:   {}", written.source_database);
        println!("  target:   {}", written.target_database);
        println!("  assignee: {}", written.assignee);
        if std::env::var(config::ENV_API_KEY).is_err() {
            println!(
                "  {} export {} before running `tasksync run`",
                "note:".dimmed(),
                config::ENV_API_KEY
            );
        }
        Ok(())
    }
}
