//! # tasksync-sync
//!
//! Change detection and propagation between two Notion databases.
//!
//! Build a [`SyncOrchestrator`] from a [`RecordSource`] and a [`RecordSink`]
//! (or let [`pipeline::build`] wire the Notion client for you), call
//! [`SyncOrchestrator::seed`] once, then [`SyncOrchestrator::run_cycle`] on
//! every poll.

pub mod error;
pub mod notion;
pub mod orchestrator;
pub mod pipeline;
pub mod source;

pub use error::SyncError;
pub use notion::NotionClient;
pub use orchestrator::{CycleReport, LastError, OrchestratorSettings, SyncOrchestrator, SyncStats};
pub use pipeline::SinkMode;
pub use source::{DryRunSink, OutboundTask, RecordSink, RecordSource};
