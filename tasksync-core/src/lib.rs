//! tasksync core library: record types, the keyed snapshot store, configuration.
//!
//! - [`types`]: [`TaskRecord`], [`DatabaseId`], [`AssigneeFilter`]
//! - [`store`]: [`KeyedSnapshotStore`] with change notification
//! - [`config`]: `~/.tasksync/config.yaml` load / save / init + env overrides
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{Config, Settings};
pub use error::ConfigError;
pub use store::{subscriber, KeyedSnapshotStore, RecordChange, Subscriber};
pub use types::{AssigneeFilter, DatabaseId, Snapshot, TaskRecord};
