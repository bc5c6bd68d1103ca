//! `tasksync fetch [--json]`: print the source database as it is right now.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tasksync_core::{config, AssigneeFilter, Snapshot};
use tasksync_sync::{NotionClient, RecordSource};

use super::home_dir;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Emit the snapshot as JSON keyed by page id.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "page")]
    page: String,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "due")]
    due: String,
    #[tabled(rename = "assignee")]
    assignee: String,
    #[tabled(rename = "mine")]
    mine: String,
}

impl FetchArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let settings = config::load_settings_at(&home).context("failed to load settings")?;
        let client =
            NotionClient::from_settings(&settings).context("cannot build Notion client")?;
        let snapshot = client
            .fetch_all_records(&settings.source_database)
            .context("fetch failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to render JSON")?
            );
            return Ok(());
        }

        println!(
            "{} {} records in {}",
            "Source".bold(),
            snapshot.len(),
            settings.source_database
        );
        if !snapshot.is_empty() {
            println!("{}", render_table(&snapshot, &settings.assignee));
        }
        Ok(())
    }
}

fn render_table(snapshot: &Snapshot, filter: &AssigneeFilter) -> String {
    let rows = snapshot.iter().map(|(id, record)| RecordRow {
        page: id.clone(),
        title: record.title.clone(),
        state: record.state.clone().unwrap_or_default(),
        due: record.due.clone().unwrap_or_default(),
        assignee: record.assignee_label(),
        mine: if filter.matches(record) { "yes" } else { "" }.to_string(),
    });
    Table::new(rows).with(Style::rounded()).to_string()
}
