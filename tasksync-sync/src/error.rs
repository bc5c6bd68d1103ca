//! Error types for tasksync-sync.

use thiserror::Error;

use tasksync_core::{ConfigError, DatabaseId};

/// All errors that can arise from fetching, diffing, and propagating records.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote collection was unreachable or answered with an error status.
    #[error("failed to fetch records from database {database}: {reason}")]
    Fetch { database: DatabaseId, reason: String },

    /// The outbound creation call failed.
    #[error("failed to create record in database {database}: {reason}")]
    Outbound { database: DatabaseId, reason: String },

    /// The remote answered, but not with something we can read.
    #[error("malformed response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },

    /// Settings were incomplete for the requested operation.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Fetch`].
pub(crate) fn fetch_err(database: &DatabaseId, reason: impl ToString) -> SyncError {
    SyncError::Fetch {
        database: database.clone(),
        reason: reason.to_string(),
    }
}

/// Convenience constructor for [`SyncError::Outbound`].
pub(crate) fn outbound_err(database: &DatabaseId, reason: impl ToString) -> SyncError {
    SyncError::Outbound {
        database: database.clone(),
        reason: reason.to_string(),
    }
}
