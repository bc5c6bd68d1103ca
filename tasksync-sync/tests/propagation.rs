use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rstest::rstest;
use tasksync_core::{AssigneeFilter, DatabaseId, Snapshot, TaskRecord};
use tasksync_sync::{
    OrchestratorSettings, OutboundTask, RecordSink, RecordSource, SyncError, SyncOrchestrator,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Hands out queued responses in order; repeats the last one once drained.
#[derive(Default)]
struct ScriptedSource {
    queue: Mutex<VecDeque<Result<Snapshot, String>>>,
    last: Mutex<Option<Snapshot>>,
}

impl ScriptedSource {
    fn push_ok(&self, snapshot: Snapshot) {
        self.queue.lock().unwrap().push_back(Ok(snapshot));
    }

    fn push_err(&self, reason: &str) {
        self.queue.lock().unwrap().push_back(Err(reason.to_string()));
    }
}

impl RecordSource for ScriptedSource {
    fn fetch_all_records(&self, database: &DatabaseId) -> Result<Snapshot, SyncError> {
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(Ok(snapshot)) => {
                *self.last.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(reason)) => Err(SyncError::Fetch {
                database: database.clone(),
                reason,
            }),
            None => Ok(self.last.lock().unwrap().clone().unwrap_or_default()),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<(DatabaseId, OutboundTask)>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn titles(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, task)| task.title.clone())
            .collect()
    }
}

impl RecordSink for RecordingSink {
    fn create_record(&self, database: &DatabaseId, task: &OutboundTask) -> Result<(), SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push((database.clone(), task.clone()));
        if self.fail {
            return Err(SyncError::Outbound {
                database: database.clone(),
                reason: "HTTP 500".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn task(title: &str, assignees: &[&str]) -> TaskRecord {
    TaskRecord {
        assignees: assignees.iter().map(|name| name.to_string()).collect(),
        state: Some("Todo".to_string()),
        ..TaskRecord::titled(title)
    }
}

fn snapshot(entries: &[(&str, TaskRecord)]) -> Snapshot {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn orchestrator(
    identity: &str,
    sink: RecordingSink,
) -> (SyncOrchestrator, Arc<ScriptedSource>, Arc<RecordingSink>) {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(sink);
    let orch = SyncOrchestrator::new(
        source.clone(),
        sink.clone(),
        OrchestratorSettings {
            source_database: DatabaseId::from("source-db"),
            target_database: DatabaseId::from("target-db"),
            assignee: AssigneeFilter::new(identity),
        },
    );
    (orch, source, sink)
}

// ---------------------------------------------------------------------------
// End-to-end propagation
// ---------------------------------------------------------------------------

#[test]
fn new_assigned_record_reaches_sink_exactly_once() {
    init_logging();
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());

    source.push_ok(snapshot(&[("p1", task("existing", &["X"]))]));
    orch.seed().expect("seed");
    assert!(sink.titles().is_empty(), "seeded records are never propagated");

    source.push_ok(snapshot(&[
        ("p1", task("existing", &["X"])),
        ("p2", task("new", &["X"])),
    ]));
    let report = orch.run_cycle().expect("cycle");

    assert_eq!(report.ingested, vec!["p2".to_string()]);
    assert_eq!(report.created, 1);
    assert_eq!(orch.source_mirror().get_record("p2"), Some(task("new", &["X"])));
    assert_eq!(orch.target_mirror().get_record("p2"), Some(task("new", &["X"])));

    let calls = sink.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, DatabaseId::from("target-db"));
    assert_eq!(calls[0].1.title, "new");
    assert_eq!(calls[0].1.state.as_deref(), Some("Todo"));
}

#[test]
fn direct_write_into_source_mirror_propagates_two_hops() {
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());
    source.push_ok(snapshot(&[("p1", TaskRecord {
        assignees: vec!["X".to_string()],
        ..TaskRecord::titled("t")
    })]));
    orch.seed().expect("seed");

    let p2 = task("second", &["X"]);
    assert!(orch.source_mirror().set_record("p2", &p2));

    assert_eq!(orch.target_mirror().get_record("p2"), Some(p2.clone()));
    assert_eq!(sink.titles(), vec!["second".to_string()]);

    orch.target_mirror()
        .set_record("p2", &TaskRecord::titled("unrelated update"));
    assert_eq!(sink.titles().len(), 1);
}

#[test]
fn later_update_of_known_key_in_target_mirror_does_not_refire() {
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());
    source.push_ok(Snapshot::new());
    orch.seed().expect("seed");
    source.push_ok(snapshot(&[("p2", task("new", &["X"]))]));
    orch.run_cycle().expect("cycle");

    assert!(orch
        .target_mirror()
        .set_record("p2", &task("renamed", &["X"])));

    assert_eq!(sink.titles(), vec!["new".to_string()]);
}

#[test]
fn quiet_cycles_do_nothing() {
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());
    source.push_ok(snapshot(&[("p1", task("a", &["X"]))]));
    orch.seed().expect("seed");

    for _ in 0..3 {
        let report = orch.run_cycle().expect("cycle");
        assert!(report.ingested.is_empty());
        assert_eq!(report.changed_ignored, 0);
    }
    assert!(sink.titles().is_empty());
    assert_eq!(orch.stats().cycles_run, 3);
}

// ---------------------------------------------------------------------------
// Identity predicate
// ---------------------------------------------------------------------------

#[rstest]
#[case::exact("X", &["X"], true)]
#[case::one_of_many("X", &["Ada", "X"], true)]
#[case::other_person("X", &["Y"], false)]
#[case::substring_only("X", &["Xavier"], false)]
#[case::unassigned("X", &[], false)]
#[case::empty_identity("", &["X"], false)]
#[case::name_with_comma("Doe, Jane", &["Ada", "Doe, Jane"], true)]
#[case::part_of_name_with_comma("Jane", &["Doe, Jane"], false)]
fn only_matching_assignee_is_created(
    #[case] identity: &str,
    #[case] assignees: &[&str],
    #[case] created: bool,
) {
    let (orch, source, sink) = orchestrator(identity, RecordingSink::default());
    source.push_ok(Snapshot::new());
    orch.seed().expect("seed");
    source.push_ok(snapshot(&[("p1", task("t", assignees))]));

    let report = orch.run_cycle().expect("cycle");

    assert_eq!(report.ingested.len(), 1, "ingestion is unconditional");
    assert!(orch.target_mirror().contains_key("p1"));
    assert_eq!(sink.titles().len(), usize::from(created));
}

// ---------------------------------------------------------------------------
// Presence-only boundary
// ---------------------------------------------------------------------------

#[test]
fn changed_existing_record_is_counted_but_not_propagated() {
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());
    source.push_ok(snapshot(&[("p1", task("before", &[]))]));
    orch.seed().expect("seed");

    source.push_ok(snapshot(&[("p1", task("after", &["X"]))]));
    let report = orch.run_cycle().expect("cycle");

    assert_eq!(report.changed_ignored, 1);
    assert!(report.ingested.is_empty());
    assert_eq!(orch.source_mirror().get_record("p1"), Some(task("before", &[])));
    assert_eq!(orch.target_mirror().get_record("p1"), Some(task("before", &[])));
    assert!(sink.titles().is_empty());
}

#[test]
fn removed_upstream_record_stays_held() {
    let (orch, source, _sink) = orchestrator("X", RecordingSink::default());
    source.push_ok(snapshot(&[("p1", task("a", &[])), ("p2", task("b", &[]))]));
    orch.seed().expect("seed");

    source.push_ok(snapshot(&[("p2", task("b", &[]))]));
    let report = orch.run_cycle().expect("cycle");

    assert!(report.ingested.is_empty());
    assert!(orch.source_mirror().contains_key("p1"));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn failed_fetch_leaves_stores_untouched_and_next_cycle_recovers() {
    init_logging();
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());
    source.push_ok(snapshot(&[("p1", task("a", &["X"]))]));
    orch.seed().expect("seed");

    source.push_err("connection refused");
    let err = orch.run_cycle().unwrap_err();
    assert!(matches!(err, SyncError::Fetch { .. }));
    assert_eq!(orch.source_mirror().keys(), vec!["p1".to_string()]);
    assert_eq!(orch.target_mirror().keys(), vec!["p1".to_string()]);

    source.push_ok(snapshot(&[
        ("p1", task("a", &["X"])),
        ("p2", task("b", &["X"])),
    ]));
    let report = orch.run_cycle().expect("recovered cycle");
    assert_eq!(report.ingested, vec!["p2".to_string()]);
    assert_eq!(sink.titles(), vec!["b".to_string()]);

    let stats = orch.stats();
    assert_eq!(stats.cycles_run, 2);
    assert_eq!(stats.cycles_failed, 1);
    assert_eq!(stats.records_ingested, 1);
    assert!(stats.last_error.is_some());
    assert!(stats.last_success.is_some());
}

#[test]
fn failed_seed_is_retried_by_first_cycle() {
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());
    source.push_err("timeout");
    assert!(orch.seed().is_err());
    assert!(!orch.is_seeded());

    source.push_ok(snapshot(&[("p1", task("a", &["X"]))]));
    let report = orch.run_cycle().expect("seeding cycle");

    assert!(report.seeded);
    assert!(report.ingested.is_empty());
    assert!(orch.target_mirror().contains_key("p1"));
    assert!(sink.titles().is_empty(), "startup records must not be created");
}

#[test]
fn outbound_failure_is_counted_not_propagated() {
    init_logging();
    let (orch, source, sink) = orchestrator("X", RecordingSink::failing());
    source.push_ok(Snapshot::new());
    orch.seed().expect("seed");

    source.push_ok(snapshot(&[
        ("p1", task("a", &["X"])),
        ("p2", task("b", &["X"])),
    ]));
    let report = orch.run_cycle().expect("cycle succeeds despite sink errors");

    assert_eq!(report.ingested.len(), 2);
    assert_eq!(report.created, 0);
    assert_eq!(report.outbound_failed, 2);
    assert_eq!(sink.titles(), vec!["a".to_string(), "b".to_string()]);
    assert!(orch.target_mirror().contains_key("p2"));

    let stats = orch.stats();
    assert_eq!(stats.outbound_failed, 2);
    assert_eq!(stats.cycles_failed, 0);
}

#[test]
fn new_keys_are_ingested_in_key_order() {
    let (orch, source, sink) = orchestrator("X", RecordingSink::default());
    source.push_ok(Snapshot::new());
    orch.seed().expect("seed");

    source.push_ok(snapshot(&[
        ("c", task("third", &["X"])),
        ("a", task("first", &["X"])),
        ("b", task("second", &["X"])),
    ]));
    let report = orch.run_cycle().expect("cycle");

    assert_eq!(report.ingested, vec!["a", "b", "c"]);
    assert_eq!(sink.titles(), vec!["first", "second", "third"]);
    assert_eq!(orch.stats().target_records, 3);
}
