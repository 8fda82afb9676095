//! Periodic mirror of the remote run into a [`SharedSnapshot`].
//!
//! Each tick issues the six reads concurrently and merges whatever came back.
//! A failed read leaves its field untouched; the next tick retries it. Once
//! [`PollerHandle::stop`] has been called no batch is applied, including one
//! that was already in flight.

use crate::remote::{RemoteError, RemoteService};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{ApplyReport, LogEntry, LogStream, PollBatch, SharedSnapshot, SnapshotField};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Synced(ApplyReport),
}

pub struct Poller {
    remote: Arc<dyn RemoteService>,
    store: SharedSnapshot,
    interval: Duration,
    events: Option<mpsc::Sender<PollEvent>>,
}

impl Poller {
    pub fn new(remote: Arc<dyn RemoteService>, store: SharedSnapshot, interval: Duration) -> Self {
        Self {
            remote,
            store,
            interval: interval.max(Duration::from_millis(10)),
            events: None,
        }
    }

    /// Reports every applied tick on `tx`. A full or closed channel never
    /// blocks the loop.
    pub fn with_events(mut self, tx: mpsc::Sender<PollEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// One fetch-and-merge round outside the loop. Used by headless commands
    /// and by the first paint.
    pub async fn poll_once(&self) -> ApplyReport {
        let epoch = self.store.run_epoch();
        let batch = fetch_batch(self.remote.as_ref()).await;
        self.apply(epoch, batch)
    }

    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        PollerHandle {
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("poller_started: interval_ms={}", self.interval.as_millis());

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let epoch = self.store.run_epoch();
                    let batch = tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                        batch = fetch_batch(self.remote.as_ref()) => batch,
                    };
                    if *shutdown.borrow() {
                        break;
                    }
                    let report = self.apply(epoch, batch);
                    if let Some(tx) = &self.events {
                        let _ = tx.try_send(PollEvent::Synced(report));
                    }
                }
            }
        }
        debug!("poller_stopped");
    }

    fn apply(&self, epoch: u64, batch: PollBatch) -> ApplyReport {
        let report = self.store.lock().apply(epoch, batch);
        if report.stale {
            debug!("poll_batch_stale: epoch={epoch}");
        }
        if report.run_finished {
            info!("run_finished");
        }
        report
    }
}

/// Cancels the loop on drop; `stop` additionally waits for the task to exit.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("poller_join_failed: {err}");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn fetch_batch(remote: &dyn RemoteService) -> PollBatch {
    let (citizen, senate, architect, metrics, status, artifact) = tokio::join!(
        remote.log_stream(LogStream::Citizen),
        remote.log_stream(LogStream::Senate),
        remote.log_stream(LogStream::Architect),
        remote.metrics(),
        remote.status(),
        remote.report(),
    );

    let mut batch = PollBatch {
        fetched_at: Some(Utc::now()),
        metrics: keep(SnapshotField::Metrics, metrics),
        status: keep(SnapshotField::Status, status),
        artifact: keep(SnapshotField::Artifact, artifact),
        ..PollBatch::default()
    };
    for (stream, result) in [
        (LogStream::Citizen, citizen),
        (LogStream::Senate, senate),
        (LogStream::Architect, architect),
    ] {
        *batch.logs_mut(stream) = keep(SnapshotField::for_stream(stream), result)
            .map(|entries| tag_entries(entries, stream));
    }
    batch
}

fn tag_entries(entries: Vec<LogEntry>, stream: LogStream) -> Vec<LogEntry> {
    entries.into_iter().map(|entry| entry.tagged(stream)).collect()
}

fn keep<T>(field: SnapshotField, result: Result<T, RemoteError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("poll_field_failed: field={field} err={err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeEndpoint, FakeRemote};
    use swarm_core::{Artifact, CyclePhase, RunStatus, SYSTEM_ROLE};

    fn remote_with_logs() -> Arc<FakeRemote> {
        let remote = Arc::new(FakeRemote::new());
        {
            let mut state = remote.state();
            state.citizen_logs = vec![
                LogEntry::new("Sarah", "Single Mom", "Rent is too high."),
                LogEntry::new("System", SYSTEM_ROLE, "--- Iteration 1/3 ---"),
            ];
            state.senate_logs = vec![LogEntry::new("Strategy Lead", "Economic Viability", "Costly.")];
            state.status = RunStatus {
                iteration: 1,
                paused: false,
                complete: false,
            };
        }
        remote
    }

    #[tokio::test]
    async fn fetch_tags_entries_with_their_population() {
        let remote = remote_with_logs();
        let batch = fetch_batch(remote.as_ref()).await;

        let citizens = batch.citizen_logs.unwrap();
        assert_eq!(citizens[0].population, Some(swarm_core::Population::Citizen));
        assert_eq!(citizens[1].population, Some(swarm_core::Population::System));
        let senate = batch.senate_logs.unwrap();
        assert_eq!(senate[0].population, Some(swarm_core::Population::Senate));
        assert!(batch.fetched_at.is_some());
    }

    #[tokio::test]
    async fn failed_read_leaves_field_unset() {
        let remote = remote_with_logs();
        remote.fail(FakeEndpoint::Metrics);
        let batch = fetch_batch(remote.as_ref()).await;
        assert!(batch.metrics.is_none());
        assert_eq!(batch.missing_fields(), vec![SnapshotField::Metrics]);
    }

    #[tokio::test]
    async fn recovered_read_fills_field_on_next_tick() {
        let remote = remote_with_logs();
        remote.state().metrics = vec![swarm_core::Metric {
            iteration: 1,
            citizen_score: 48.0,
            senate_score: 61.5,
        }];
        let store = SharedSnapshot::new();
        let poller = Poller::new(remote.clone(), store.clone(), DEFAULT_POLL_INTERVAL);

        remote.fail(FakeEndpoint::Metrics);
        let first = poller.poll_once().await;
        assert_eq!(first.missing, vec![SnapshotField::Metrics]);
        assert!(store.lock().metrics().is_empty());

        remote.recover(FakeEndpoint::Metrics);
        let second = poller.poll_once().await;
        assert!(!second.is_partial());
        assert_eq!(second.changed, vec![SnapshotField::Metrics]);
        assert_eq!(store.lock().metrics().len(), 1);
    }

    #[tokio::test]
    async fn poll_once_moves_phase_to_complete() {
        let remote = remote_with_logs();
        let store = SharedSnapshot::new();
        let poller = Poller::new(remote.clone(), store.clone(), DEFAULT_POLL_INTERVAL);

        poller.poll_once().await;
        assert_eq!(store.phase(), CyclePhase::Running);

        {
            let mut state = remote.state();
            state.status.complete = true;
            state.report = "# Final Policy".to_string();
        }
        let report = poller.poll_once().await;
        assert!(report.run_finished);
        assert_eq!(store.phase(), CyclePhase::Complete);
        assert_eq!(store.lock().artifact(), &Artifact::from_text("# Final Policy"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_loop_reports_and_stops() {
        let remote = remote_with_logs();
        let store = SharedSnapshot::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::new(remote.clone(), store.clone(), Duration::from_millis(20))
            .with_events(tx)
            .spawn();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poll event")
            .expect("channel open");
        let PollEvent::Synced(report) = event;
        assert!(report.changed.contains(&SnapshotField::CitizenLogs));
        assert!(handle.is_running());

        handle.stop().await;
        let calls_after_stop = remote.call_count(FakeEndpoint::Status);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(remote.call_count(FakeEndpoint::Status), calls_after_stop);
    }
}
