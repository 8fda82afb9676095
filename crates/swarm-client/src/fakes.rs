//! In-memory remote for tests and offline runs.
//!
//! `FakeRemote` keeps the same state the real service exposes and can be
//! told to fail or stall individual endpoints.

use crate::remote::{RemoteError, RemoteService};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use swarm_core::{
    AgentProfile, Artifact, LogEntry, LogStream, Metric, PipelineConfig, RunStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeEndpoint {
    Logs(LogStream),
    Metrics,
    Status,
    Report,
    Agents,
    Config,
    Submit,
    Upload,
    Pause,
    Continue,
    StopAndDownload,
    Download,
    UpdateConfig,
}

#[derive(Debug, Clone, Default)]
pub struct FakeState {
    pub citizen_logs: Vec<LogEntry>,
    pub senate_logs: Vec<LogEntry>,
    pub architect_logs: Vec<LogEntry>,
    pub metrics: Vec<Metric>,
    pub status: RunStatus,
    pub report: String,
    pub agents: Vec<AgentProfile>,
    pub config: PipelineConfig,
    pub submitted: Vec<String>,
    pub stopped: bool,
}

impl FakeState {
    pub fn logs_mut(&mut self, stream: LogStream) -> &mut Vec<LogEntry> {
        match stream {
            LogStream::Citizen => &mut self.citizen_logs,
            LogStream::Senate => &mut self.senate_logs,
            LogStream::Architect => &mut self.architect_logs,
        }
    }

    fn reset_run(&mut self, policy: String) {
        self.citizen_logs.clear();
        self.senate_logs.clear();
        self.architect_logs.clear();
        self.metrics.clear();
        self.report.clear();
        self.status = RunStatus::default();
        self.stopped = false;
        self.submitted.push(policy);
    }
}

#[derive(Debug, Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    failing: Mutex<HashSet<FakeEndpoint>>,
    delays: Mutex<HashMap<FakeEndpoint, Duration>>,
    calls: Mutex<Vec<FakeEndpoint>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: FakeState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail(&self, endpoint: FakeEndpoint) {
        self.failing_set().insert(endpoint);
    }

    pub fn recover(&self, endpoint: FakeEndpoint) {
        self.failing_set().remove(&endpoint);
    }

    /// Holds every later request to `endpoint` for `delay` before it is
    /// answered. The call is recorded as soon as it arrives.
    pub fn stall(&self, endpoint: FakeEndpoint, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(endpoint, delay);
    }

    /// Every endpoint hit so far, in order.
    pub fn calls(&self) -> Vec<FakeEndpoint> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self, endpoint: FakeEndpoint) -> usize {
        self.calls().into_iter().filter(|call| *call == endpoint).count()
    }

    fn failing_set(&self) -> MutexGuard<'_, HashSet<FakeEndpoint>> {
        self.failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn hit(&self, endpoint: FakeEndpoint) -> Result<(), RemoteError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(endpoint);
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&endpoint)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_set().contains(&endpoint) {
            return Err(RemoteError::Unavailable(format!("{endpoint:?} is failing")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn log_stream(&self, stream: LogStream) -> Result<Vec<LogEntry>, RemoteError> {
        self.hit(FakeEndpoint::Logs(stream)).await?;
        Ok(self.state().logs_mut(stream).clone())
    }

    async fn metrics(&self) -> Result<Vec<Metric>, RemoteError> {
        self.hit(FakeEndpoint::Metrics).await?;
        Ok(self.state().metrics.clone())
    }

    async fn status(&self) -> Result<RunStatus, RemoteError> {
        self.hit(FakeEndpoint::Status).await?;
        Ok(self.state().status)
    }

    async fn report(&self) -> Result<Artifact, RemoteError> {
        self.hit(FakeEndpoint::Report).await?;
        Ok(Artifact::from_text(self.state().report.clone()))
    }

    async fn agents(&self) -> Result<Vec<AgentProfile>, RemoteError> {
        self.hit(FakeEndpoint::Agents).await?;
        Ok(self.state().agents.clone())
    }

    async fn config(&self) -> Result<PipelineConfig, RemoteError> {
        self.hit(FakeEndpoint::Config).await?;
        Ok(self.state().config.clone())
    }

    async fn submit_policy(&self, policy: &str) -> Result<(), RemoteError> {
        self.hit(FakeEndpoint::Submit).await?;
        self.state().reset_run(policy.to_string());
        Ok(())
    }

    async fn upload_policy(&self, filename: &str, content: &str) -> Result<(), RemoteError> {
        self.hit(FakeEndpoint::Upload).await?;
        if filename.is_empty() {
            return Err(RemoteError::Rejected("missing filename".to_string()));
        }
        self.state().reset_run(content.to_string());
        Ok(())
    }

    async fn pause_cycle(&self) -> Result<(), RemoteError> {
        self.hit(FakeEndpoint::Pause).await?;
        self.state().status.paused = true;
        Ok(())
    }

    async fn continue_cycle(&self) -> Result<(), RemoteError> {
        self.hit(FakeEndpoint::Continue).await?;
        self.state().status.paused = false;
        Ok(())
    }

    async fn stop_and_download(&self) -> Result<Artifact, RemoteError> {
        self.hit(FakeEndpoint::StopAndDownload).await?;
        let mut state = self.state();
        state.stopped = true;
        Ok(Artifact::from_text(state.report.clone()))
    }

    async fn download_policy(&self) -> Result<Artifact, RemoteError> {
        self.hit(FakeEndpoint::Download).await?;
        Ok(Artifact::from_text(self.state().report.clone()))
    }

    async fn update_config(&self, fast_demo: bool) -> Result<PipelineConfig, RemoteError> {
        self.hit(FakeEndpoint::UpdateConfig).await?;
        let mut state = self.state();
        state.config = if fast_demo {
            PipelineConfig {
                fast_demo,
                max_exchanges: 25,
                max_senate_exchanges: 5,
            }
        } else {
            PipelineConfig {
                fast_demo,
                max_exchanges: 100,
                max_senate_exchanges: 10,
            }
        };
        Ok(state.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_state_is_an_idle_run() {
        let remote = FakeRemote::with_state(FakeState::default());
        assert_eq!(remote.status().await.unwrap(), RunStatus::default());
        assert_eq!(remote.config().await.unwrap(), PipelineConfig::default());
        assert!(remote.report().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stalled_endpoint_is_recorded_before_it_answers() {
        let remote = std::sync::Arc::new(FakeRemote::new());
        remote.stall(FakeEndpoint::Submit, Duration::from_millis(100));
        let pending = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.submit_policy("Ban X").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(remote.call_count(FakeEndpoint::Submit), 1);
        assert!(remote.state().submitted.is_empty());

        pending.await.unwrap().unwrap();
        assert_eq!(remote.state().submitted, vec!["Ban X".to_string()]);
    }
}
