//! Locally held, eventually consistent copy of the remote run.
//!
//! Only two writers exist: the poller (through [`SnapshotStore::apply`]) and
//! submit (through [`SnapshotStore::begin_run`] and
//! [`SnapshotStore::revert_submit`]). Everything else reads.

use crate::cycle::CyclePhase;
use crate::{Artifact, LogEntry, LogStream, Metric, RunStatus};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunIntent {
    pub submitted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotField {
    CitizenLogs,
    SenateLogs,
    ArchitectLogs,
    Metrics,
    Status,
    Artifact,
}

impl SnapshotField {
    pub const ALL: [SnapshotField; 6] = [
        SnapshotField::CitizenLogs,
        SnapshotField::SenateLogs,
        SnapshotField::ArchitectLogs,
        SnapshotField::Metrics,
        SnapshotField::Status,
        SnapshotField::Artifact,
    ];

    pub fn for_stream(stream: LogStream) -> Self {
        match stream {
            LogStream::Citizen => SnapshotField::CitizenLogs,
            LogStream::Senate => SnapshotField::SenateLogs,
            LogStream::Architect => SnapshotField::ArchitectLogs,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotField::CitizenLogs => "citizen_logs",
            SnapshotField::SenateLogs => "senate_logs",
            SnapshotField::ArchitectLogs => "architect_logs",
            SnapshotField::Metrics => "metrics",
            SnapshotField::Status => "status",
            SnapshotField::Artifact => "artifact",
        }
    }
}

impl fmt::Display for SnapshotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one poll tick. `None` marks a sub-request that failed; the
/// matching field keeps its previous value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollBatch {
    pub fetched_at: Option<DateTime<Utc>>,
    pub citizen_logs: Option<Vec<LogEntry>>,
    pub senate_logs: Option<Vec<LogEntry>>,
    pub architect_logs: Option<Vec<LogEntry>>,
    pub metrics: Option<Vec<Metric>>,
    pub status: Option<RunStatus>,
    pub artifact: Option<Artifact>,
}

impl PollBatch {
    pub fn logs_mut(&mut self, stream: LogStream) -> &mut Option<Vec<LogEntry>> {
        match stream {
            LogStream::Citizen => &mut self.citizen_logs,
            LogStream::Senate => &mut self.senate_logs,
            LogStream::Architect => &mut self.architect_logs,
        }
    }

    pub fn missing_fields(&self) -> Vec<SnapshotField> {
        SnapshotField::ALL
            .into_iter()
            .filter(|field| !self.has(*field))
            .collect()
    }

    fn has(&self, field: SnapshotField) -> bool {
        match field {
            SnapshotField::CitizenLogs => self.citizen_logs.is_some(),
            SnapshotField::SenateLogs => self.senate_logs.is_some(),
            SnapshotField::ArchitectLogs => self.architect_logs.is_some(),
            SnapshotField::Metrics => self.metrics.is_some(),
            SnapshotField::Status => self.status.is_some(),
            SnapshotField::Artifact => self.artifact.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyReport {
    /// The batch was issued before the latest submit was acknowledged and
    /// was dropped whole.
    pub stale: bool,
    pub changed: Vec<SnapshotField>,
    pub missing: Vec<SnapshotField>,
    /// Set on the tick that first observes a complete run with its artifact.
    pub run_finished: bool,
}

impl ApplyReport {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotStore {
    citizen_logs: Vec<LogEntry>,
    senate_logs: Vec<LogEntry>,
    architect_logs: Vec<LogEntry>,
    metrics: Vec<Metric>,
    status: RunStatus,
    artifact: Artifact,
    intent: RunIntent,
    run_epoch: u64,
    submit_pending: bool,
    run_finished: bool,
    revision: u64,
    last_synced_at: Option<DateTime<Utc>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self, stream: LogStream) -> &[LogEntry] {
        match stream {
            LogStream::Citizen => &self.citizen_logs,
            LogStream::Senate => &self.senate_logs,
            LogStream::Architect => &self.architect_logs,
        }
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn latest_metric(&self) -> Option<&Metric> {
        self.metrics.last()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn intent(&self) -> RunIntent {
        self.intent
    }

    pub fn run_epoch(&self) -> u64 {
        self.run_epoch
    }

    /// A submit is in flight; the remote may still report the previous run.
    pub fn submit_pending(&self) -> bool {
        self.submit_pending
    }

    /// Latched once a complete run with its artifact has been observed, and
    /// cleared by the next [`SnapshotStore::begin_run`].
    pub fn run_finished(&self) -> bool {
        self.run_finished
    }

    /// Bumped whenever any observable field changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn phase(&self) -> CyclePhase {
        CyclePhase::derive(&self.status, &self.intent)
    }

    /// Merges one poll batch. Fields are replaced wholesale; missing fields
    /// are left alone. Applying the same batch twice is a no-op the second
    /// time. Nothing is merged while a submit is unacknowledged.
    pub fn apply(&mut self, epoch: u64, batch: PollBatch) -> ApplyReport {
        let mut report = ApplyReport {
            missing: batch.missing_fields(),
            ..ApplyReport::default()
        };
        if epoch != self.run_epoch || self.submit_pending {
            report.stale = true;
            return report;
        }

        if let Some(logs) = batch.citizen_logs {
            replace_field(&mut self.citizen_logs, logs, SnapshotField::CitizenLogs, &mut report);
        }
        if let Some(logs) = batch.senate_logs {
            replace_field(&mut self.senate_logs, logs, SnapshotField::SenateLogs, &mut report);
        }
        if let Some(logs) = batch.architect_logs {
            replace_field(
                &mut self.architect_logs,
                logs,
                SnapshotField::ArchitectLogs,
                &mut report,
            );
        }
        if let Some(metrics) = batch.metrics {
            replace_field(&mut self.metrics, metrics, SnapshotField::Metrics, &mut report);
        }
        if let Some(status) = batch.status {
            replace_field(&mut self.status, status, SnapshotField::Status, &mut report);
        }
        if let Some(artifact) = batch.artifact {
            replace_field(&mut self.artifact, artifact, SnapshotField::Artifact, &mut report);
        }
        if batch.fetched_at.is_some() {
            self.last_synced_at = batch.fetched_at;
        }

        if self.status.complete && !self.artifact.is_empty() && !self.run_finished {
            self.run_finished = true;
            self.intent.submitted = false;
            report.run_finished = true;
        }
        if !report.changed.is_empty() || report.run_finished {
            self.revision += 1;
        }
        report
    }

    /// Clears every trace of the previous run and records the submit intent.
    /// Returns the epoch of the pending submit. Until
    /// [`SnapshotStore::acknowledge_submit`] or
    /// [`SnapshotStore::revert_submit`] settles it, every batch is discarded.
    pub fn begin_run(&mut self) -> u64 {
        self.citizen_logs.clear();
        self.senate_logs.clear();
        self.architect_logs.clear();
        self.metrics.clear();
        self.artifact = Artifact::default();
        self.status = RunStatus::default();
        self.intent.submitted = true;
        self.submit_pending = true;
        self.run_finished = false;
        self.run_epoch += 1;
        self.revision += 1;
        self.run_epoch
    }

    /// The remote accepted the submit. Moves to a fresh epoch so a batch
    /// fetched while the request was in flight cannot land afterwards.
    pub fn acknowledge_submit(&mut self, epoch: u64) -> bool {
        if epoch != self.run_epoch || !self.submit_pending {
            return false;
        }
        self.submit_pending = false;
        self.run_epoch += 1;
        true
    }

    /// Undoes the optimistic running state after a failed submit. A later
    /// submit owns the intent, so an outdated epoch is ignored.
    pub fn revert_submit(&mut self, epoch: u64) -> bool {
        if epoch != self.run_epoch || !self.intent.submitted {
            return false;
        }
        self.submit_pending = false;
        self.intent.submitted = false;
        self.revision += 1;
        true
    }
}

fn replace_field<T: PartialEq>(
    slot: &mut T,
    next: T,
    field: SnapshotField,
    report: &mut ApplyReport,
) {
    if *slot != next {
        *slot = next;
        report.changed.push(field);
    }
}

/// Process-wide handle to one snapshot, created when a view mounts and
/// handed to the poller and dispatcher.
#[derive(Debug, Clone, Default)]
pub struct SharedSnapshot {
    inner: Arc<Mutex<SnapshotStore>>,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never held across an await point; a poisoned lock still yields the
    /// last written state.
    pub fn lock(&self) -> MutexGuard<'_, SnapshotStore> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> CyclePhase {
        self.lock().phase()
    }

    pub fn run_epoch(&self) -> u64 {
        self.lock().run_epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogEntry, SYSTEM_ROLE};

    fn entry(agent: &str, message: &str) -> LogEntry {
        LogEntry::new(agent, "Citizen", message)
    }

    fn full_batch() -> PollBatch {
        PollBatch {
            fetched_at: None,
            citizen_logs: Some(vec![entry("Sarah", "No."), entry("Jamal", "Maybe.")]),
            senate_logs: Some(vec![LogEntry::new("System", SYSTEM_ROLE, "Phase 2")]),
            architect_logs: Some(Vec::new()),
            metrics: Some(vec![Metric {
                iteration: 1,
                citizen_score: 42.0,
                senate_score: 55.5,
            }]),
            status: Some(RunStatus {
                iteration: 1,
                paused: false,
                complete: false,
            }),
            artifact: Some(Artifact::default()),
        }
    }

    #[test]
    fn applying_same_batch_twice_is_idempotent() {
        let mut once = SnapshotStore::new();
        let first = once.apply(0, full_batch());
        assert!(!first.changed.is_empty());

        let mut twice = once.clone();
        let second = twice.apply(0, full_batch());
        assert!(second.changed.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn failed_metric_fetch_keeps_previous_series() {
        let mut store = SnapshotStore::new();
        store.apply(0, full_batch());

        let mut partial = full_batch();
        partial.metrics = None;
        partial.citizen_logs = Some(vec![
            entry("Sarah", "No."),
            entry("Jamal", "Maybe."),
            entry("Elsie", "Protect the pension."),
        ]);
        partial.status = Some(RunStatus {
            iteration: 2,
            paused: false,
            complete: false,
        });
        let report = store.apply(0, partial);

        assert!(report.is_partial());
        assert_eq!(report.missing, vec![SnapshotField::Metrics]);
        assert_eq!(store.metrics().len(), 1);
        assert_eq!(store.logs(LogStream::Citizen).len(), 3);
        assert_eq!(store.status().iteration, 2);
    }

    #[test]
    fn begin_run_clears_prior_run_state() {
        let mut store = SnapshotStore::new();
        let mut batch = full_batch();
        batch.metrics = Some(vec![Metric {
            iteration: 0,
            citizen_score: 10.0,
            senate_score: 20.0,
        }]);
        batch.citizen_logs = Some(vec![entry("a", "1"), entry("b", "2"), entry("c", "3")]);
        batch.artifact = Some(Artifact::from_text("old report"));
        store.apply(0, batch);

        store.begin_run();

        assert!(store.metrics().is_empty());
        assert!(store.logs(LogStream::Citizen).is_empty());
        assert!(store.artifact().is_empty());
        assert_eq!(store.phase(), CyclePhase::Running);
    }

    #[test]
    fn batch_from_previous_epoch_is_discarded() {
        let mut store = SnapshotStore::new();
        let issued_under = store.run_epoch();
        let epoch = store.begin_run();
        assert_ne!(issued_under, epoch);
        store.acknowledge_submit(epoch);

        let mut stale = full_batch();
        stale.artifact = Some(Artifact::from_text("old report"));
        let report = store.apply(issued_under, stale);

        assert!(report.stale);
        assert!(store.artifact().is_empty());
        assert!(store.logs(LogStream::Citizen).is_empty());
    }

    #[test]
    fn previous_run_read_during_submit_is_discarded() {
        let mut store = SnapshotStore::new();
        let mut finished = full_batch();
        finished.status = Some(RunStatus {
            iteration: 3,
            paused: false,
            complete: true,
        });
        finished.artifact = Some(Artifact::from_text("old report"));
        store.apply(0, finished.clone());
        assert!(store.run_finished());

        let pending = store.begin_run();
        // fetched and applied while the request is still out
        let during = store.apply(store.run_epoch(), finished.clone());
        assert!(during.stale);
        assert!(!during.run_finished);
        assert_eq!(store.phase(), CyclePhase::Running);

        // fetched before the ack, applied after it
        let issued_under = store.run_epoch();
        assert!(store.acknowledge_submit(pending));
        let late = store.apply(issued_under, finished);
        assert!(late.stale);
        assert!(store.artifact().is_empty());
        assert!(store.logs(LogStream::Citizen).is_empty());
        assert!(store.intent().submitted);
        assert!(!store.run_finished());

        let mut reset = full_batch();
        reset.status = Some(RunStatus::default());
        let fresh = store.apply(store.run_epoch(), reset);
        assert!(!fresh.stale);
        assert_eq!(store.phase(), CyclePhase::Running);
    }

    #[test]
    fn completion_with_artifact_clears_submit_intent_once() {
        let mut store = SnapshotStore::new();
        let pending = store.begin_run();
        store.acknowledge_submit(pending);
        let epoch = store.run_epoch();

        let mut done = full_batch();
        done.status = Some(RunStatus {
            iteration: 3,
            paused: false,
            complete: true,
        });
        done.artifact = Some(Artifact::from_text("# Final Policy"));
        let report = store.apply(epoch, done.clone());
        assert!(report.run_finished);
        assert!(!store.intent().submitted);
        assert_eq!(store.phase(), CyclePhase::Complete);

        let again = store.apply(epoch, done);
        assert!(!again.run_finished);
    }

    #[test]
    fn completion_without_artifact_keeps_waiting() {
        let mut store = SnapshotStore::new();
        let pending = store.begin_run();
        store.acknowledge_submit(pending);
        let epoch = store.run_epoch();
        let mut batch = full_batch();
        batch.status = Some(RunStatus {
            iteration: 3,
            paused: false,
            complete: true,
        });
        let report = store.apply(epoch, batch);
        assert!(!report.run_finished);
        assert!(store.intent().submitted);
    }

    #[test]
    fn revert_only_applies_to_current_epoch() {
        let mut store = SnapshotStore::new();
        let first = store.begin_run();
        let second = store.begin_run();
        assert!(!store.revert_submit(first));
        assert!(store.intent().submitted);
        assert!(store.revert_submit(second));
        assert!(!store.submit_pending());
        assert_eq!(store.phase(), CyclePhase::Ready);
        assert!(!store.acknowledge_submit(second));
    }
}
