//! Two-hop propagation between the source mirror (A) and the target mirror (B).
//!
//! ```text
//! fetch ──► throwaway store ──new keys──► A ──mirror──► B ──first sight + assignee──► sink
//! ```
//!
//! Only keys absent from A are ingested. A record that already exists in A is
//! never re-propagated, even when its fields changed upstream; such records
//! are counted in [`CycleReport::changed_ignored`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tasksync_core::{
    subscriber, AssigneeFilter, DatabaseId, KeyedSnapshotStore, RecordChange, Settings,
    Subscriber, TaskRecord,
};

use crate::source::{OutboundTask, RecordSink, RecordSource};
use crate::SyncError;

/// The subset of [`Settings`] the orchestrator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub source_database: DatabaseId,
    pub target_database: DatabaseId,
    pub assignee: AssigneeFilter,
}

impl From<&Settings> for OrchestratorSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            source_database: settings.source_database.clone(),
            target_database: settings.target_database.clone(),
            assignee: settings.assignee.clone(),
        }
    }
}

/// Outcome of one [`SyncOrchestrator::run_cycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Records in the fresh snapshot.
    pub fetched: usize,
    /// Keys copied into A this cycle, in snapshot order.
    pub ingested: Vec<String>,
    /// Keys held by A whose fresh value differs; not propagated.
    pub changed_ignored: usize,
    /// Outbound creations that succeeded during this cycle.
    pub created: usize,
    /// Outbound creations that failed during this cycle.
    pub outbound_failed: usize,
    /// The cycle seeded the stores instead of diffing.
    #[serde(default)]
    pub seeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Running totals since the orchestrator was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub records_ingested: u64,
    pub outbound_created: u64,
    pub outbound_failed: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub source_records: usize,
    pub target_records: usize,
}

#[derive(Default)]
struct OutboundCounters {
    created: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Default)]
struct CycleTotals {
    cycles_run: u64,
    cycles_failed: u64,
    records_ingested: u64,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<LastError>,
}

pub struct SyncOrchestrator {
    settings: OrchestratorSettings,
    source: Arc<dyn RecordSource>,
    source_mirror: Arc<KeyedSnapshotStore<TaskRecord>>,
    target_mirror: Arc<KeyedSnapshotStore<TaskRecord>>,
    outbound: Arc<OutboundCounters>,
    totals: Mutex<CycleTotals>,
    seeded: AtomicBool,
    // Held so the wiring is visible; the stores keep their own references.
    _mirror_sub: Subscriber<TaskRecord>,
    _outbound_sub: Subscriber<TaskRecord>,
}

impl SyncOrchestrator {
    /// Create both stores and wire the two propagation hops.
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RecordSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let source_mirror = Arc::new(KeyedSnapshotStore::new());
        let target_mirror = Arc::new(KeyedSnapshotStore::new());
        let outbound = Arc::new(OutboundCounters::default());

        // Hop 1: A -> B.
        let mirror_target = Arc::clone(&target_mirror);
        let mirror_sub = subscriber(move |change: &RecordChange<'_, TaskRecord>| {
            if let Some(value) = change.changed_value {
                mirror_target.set_record(change.key, value);
            }
        });
        source_mirror.subscribe(&mirror_sub);

        // Hop 2: B -> remote, on first appearance of a key assigned to us.
        let filter = settings.assignee.clone();
        let target_db = settings.target_database.clone();
        let counters = Arc::clone(&outbound);
        let outbound_sub = subscriber(move |change: &RecordChange<'_, TaskRecord>| {
            if change.prev_value.is_some() {
                return;
            }
            let Some(record) = change.changed_value else {
                return;
            };
            if !filter.matches(record) {
                tracing::debug!("skipping {}: not assigned to {}", change.key, filter.identity());
                return;
            }
            match sink.create_record(&target_db, &OutboundTask::from(record)) {
                Ok(()) => {
                    counters.created.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("outbound create for {} failed: {}", change.key, e);
                }
            }
        });
        target_mirror.subscribe(&outbound_sub);

        Self {
            settings,
            source,
            source_mirror,
            target_mirror,
            outbound,
            totals: Mutex::new(CycleTotals::default()),
            seeded: AtomicBool::new(false),
            _mirror_sub: mirror_sub,
            _outbound_sub: outbound_sub,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Store A: what has been seen in the source database.
    pub fn source_mirror(&self) -> &KeyedSnapshotStore<TaskRecord> {
        &self.source_mirror
    }

    /// Store B: what has been mirrored toward the target database.
    pub fn target_mirror(&self) -> &KeyedSnapshotStore<TaskRecord> {
        &self.target_mirror
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded.load(Ordering::Acquire)
    }

    /// Fetch once and load the result into both stores without notifying.
    /// Records that exist at startup are never propagated.
    pub fn seed(&self) -> Result<usize, SyncError> {
        let snapshot = self
            .source
            .fetch_all_records(&self.settings.source_database)?;
        let count = snapshot.len();
        self.target_mirror.reset(snapshot.clone());
        self.source_mirror.reset(snapshot);
        self.seeded.store(true, Ordering::Release);
        tracing::info!(
            "seeded {} records from {}",
            count,
            self.settings.source_database
        );
        Ok(count)
    }

    /// One poll: fetch, diff against A, ingest the new keys.
    ///
    /// A fetch failure leaves both stores untouched. If [`seed`](Self::seed)
    /// never succeeded, this cycle seeds instead of diffing.
    pub fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let result = self.cycle();
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.cycles_run += 1;
        match &result {
            Ok(report) => {
                totals.records_ingested += report.ingested.len() as u64;
                totals.last_success = Some(Utc::now());
            }
            Err(e) => {
                totals.cycles_failed += 1;
                totals.last_error = Some(LastError {
                    at: Utc::now(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Count a cycle that ended without a result, e.g. one whose worker
    /// panicked before [`run_cycle`](Self::run_cycle) could record it.
    pub fn record_failed_cycle(&self, message: impl Into<String>) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.cycles_run += 1;
        totals.cycles_failed += 1;
        totals.last_error = Some(LastError {
            at: Utc::now(),
            message: message.into(),
        });
    }

    fn cycle(&self) -> Result<CycleReport, SyncError> {
        if !self.is_seeded() {
            let fetched = self.seed()?;
            return Ok(CycleReport {
                fetched,
                seeded: true,
                ..CycleReport::default()
            });
        }

        let fresh_records = self
            .source
            .fetch_all_records(&self.settings.source_database)?;
        let fetched = fresh_records.len();
        let fresh = KeyedSnapshotStore::from_records(&fresh_records);

        let changed_ignored = fresh_records
            .iter()
            .filter(|(key, value)| {
                self.source_mirror
                    .get_record(key)
                    .is_some_and(|held| &held != *value)
            })
            .count();
        if changed_ignored > 0 {
            tracing::debug!("{} existing records changed upstream; not propagated", changed_ignored);
        }

        let created_before = self.outbound.created.load(Ordering::Relaxed);
        let failed_before = self.outbound.failed.load(Ordering::Relaxed);

        let new_keys = self.source_mirror.new_keys(&fresh);
        for key in &new_keys {
            if let Some(record) = fresh.get_record(key) {
                self.source_mirror.set_record(key, &record);
            }
        }

        let report = CycleReport {
            fetched,
            ingested: new_keys,
            changed_ignored,
            created: self.outbound.created.load(Ordering::Relaxed) - created_before,
            outbound_failed: self.outbound.failed.load(Ordering::Relaxed) - failed_before,
            seeded: false,
        };
        if !report.ingested.is_empty() {
            tracing::info!(
                "ingested {} new records ({} created, {} failed)",
                report.ingested.len(),
                report.created,
                report.outbound_failed
            );
        }
        Ok(report)
    }

    pub fn stats(&self) -> SyncStats {
        let totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        SyncStats {
            cycles_run: totals.cycles_run,
            cycles_failed: totals.cycles_failed,
            records_ingested: totals.records_ingested,
            outbound_created: self.outbound.created.load(Ordering::Relaxed) as u64,
            outbound_failed: self.outbound.failed.load(Ordering::Relaxed) as u64,
            last_success: totals.last_success,
            last_error: totals.last_error.clone(),
            source_records: self.source_mirror.len(),
            target_records: self.target_mirror.len(),
        }
    }
}
