//! Seams to the remote services: where snapshots come from and where new
//! records go.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use tasksync_core::{DatabaseId, Snapshot, TaskRecord};

use crate::SyncError;

/// Reads a complete snapshot of a remote collection.
///
/// Implementations paginate internally and must fail rather than return a
/// partial snapshot.
pub trait RecordSource: Send + Sync {
    fn fetch_all_records(&self, database: &DatabaseId) -> Result<Snapshot, SyncError>;
}

/// Creates one record in a remote collection.
pub trait RecordSink: Send + Sync {
    fn create_record(&self, database: &DatabaseId, task: &OutboundTask) -> Result<(), SyncError>;
}

/// Fields sent when a qualifying record is created in the target database.
///
/// Assignees are not carried over: the target addresses people by user id,
/// not by display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl From<&TaskRecord> for OutboundTask {
    fn from(record: &TaskRecord) -> Self {
        Self {
            title: record.title.clone(),
            state: record.state.clone(),
            due: record.due.clone(),
            priority: record.priority.clone(),
        }
    }
}

/// Logs what would be created without touching the remote.
#[derive(Debug, Default)]
pub struct DryRunSink {
    would_create: AtomicUsize,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn would_create(&self) -> usize {
        self.would_create.load(Ordering::Relaxed)
    }
}

impl RecordSink for DryRunSink {
    fn create_record(&self, database: &DatabaseId, task: &OutboundTask) -> Result<(), SyncError> {
        self.would_create.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[dry-run] would create '{}' in {}", task.title, database);
        Ok(())
    }
}
