//! `tasksync run [--dry-run]`: a foreground configuration and connectivity
//! check. It seeds, then diffs once, so only pages created in between are
//! picked up.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tasksync_core::config;
use tasksync_sync::pipeline::{self, SinkMode};
use tasksync_sync::CycleReport;

use super::home_dir;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Log pages that would be created instead of creating them.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let settings = config::load_settings_at(&home).context("failed to load settings")?;
        let mode = if self.dry_run {
            SinkMode::DryRun
        } else {
            SinkMode::Live
        };
        let orchestrator = pipeline::build(&settings, mode)?;
        let report = pipeline::run_once(&orchestrator).context("sync cycle failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render JSON")?
            );
        } else {
            print_report(&report, self.dry_run);
        }
        Ok(())
    }
}

fn print_report(report: &CycleReport, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    if report.ingested.is_empty() {
        println!(
            "{prefix}{} source reachable, no new records ({} fetched)",
            "✓".green(),
            report.fetched
        );
        println!(
            "  {}",
            "pages present at startup are never propagated; use `tasksync daemon start` to sync new ones"
                .dimmed()
        );
    } else {
        println!(
            "{prefix}{} {} new records, {} created",
            "✓".green(),
            report.ingested.len(),
            report.created
        );
        for key in &report.ingested {
            println!("  + {key}");
        }
    }
    if report.outbound_failed > 0 {
        println!(
            "{prefix}{} {} creations failed",
            "✗".red(),
            report.outbound_failed
        );
    }
    if report.changed_ignored > 0 {
        println!(
            "{prefix}  {} existing records changed upstream (not propagated)",
            report.changed_ignored
        );
    }
}
