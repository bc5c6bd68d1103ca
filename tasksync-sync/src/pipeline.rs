//! Shared wiring used by the CLI and the daemon.

use std::sync::Arc;

use tasksync_core::Settings;

use crate::notion::NotionClient;
use crate::orchestrator::{CycleReport, OrchestratorSettings, SyncOrchestrator};
use crate::source::{DryRunSink, RecordSink};
use crate::SyncError;

/// Where outbound creations go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    #[default]
    Live,
    /// Log instead of creating pages in the target database.
    DryRun,
}

/// Build an orchestrator backed by the Notion API.
///
/// Fails when the API token is missing, even in dry-run mode, since the
/// source database is always read.
pub fn build(settings: &Settings, mode: SinkMode) -> Result<SyncOrchestrator, SyncError> {
    let client = Arc::new(NotionClient::from_settings(settings)?);
    let sink: Arc<dyn RecordSink> = match mode {
        SinkMode::Live => client.clone(),
        SinkMode::DryRun => Arc::new(DryRunSink::new()),
    };
    Ok(SyncOrchestrator::new(
        client,
        sink,
        OrchestratorSettings::from(settings),
    ))
}

/// Seed, then run a single cycle. This is what `tasksync run` does.
///
/// The cycle diffs against the seed taken moments earlier, so it only ingests
/// pages created in between. Callers treat it as a connectivity check.
pub fn run_once(orchestrator: &SyncOrchestrator) -> Result<CycleReport, SyncError> {
    if !orchestrator.is_seeded() {
        orchestrator.seed()?;
    }
    orchestrator.run_cycle()
}
