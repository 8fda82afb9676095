//! Translates user intents into remote commands, gated by the current phase.
//!
//! Phase changes that follow a command are never applied here; the next
//! poll observes them. The single exception is submit, which records the
//! intent immediately so the view shows a running run before the remote
//! catches up.

use crate::export::{ArtifactExporter, ExportError};
use crate::remote::{RemoteError, RemoteService};
use std::path::PathBuf;
use std::sync::Arc;
use swarm_core::{
    AgentProfile, Artifact, ControlAction, CyclePhase, PipelineConfig, PolicyInputError,
    PolicySource, SharedSnapshot,
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid policy: {0}")]
    Input(#[from] PolicyInputError),
    #[error("submit failed: {0}")]
    Submit(#[source] RemoteError),
    #[error("upload failed: {0}")]
    Upload(#[source] RemoteError),
    #[error("pause failed: {0}")]
    Pause(#[source] RemoteError),
    #[error("resume failed: {0}")]
    Resume(#[source] RemoteError),
    #[error("stop failed: {0}")]
    Terminate(#[source] RemoteError),
    #[error("download failed: {0}")]
    Download(#[source] RemoteError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("config update failed: {0}")]
    Config(#[source] RemoteError),
}

impl DispatchError {
    /// Pause and resume failures stay in the log; the next poll shows the
    /// real state anyway.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, DispatchError::Pause(_) | DispatchError::Resume(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent(ControlAction),
    Exported { path: PathBuf, bytes: usize },
    /// The action is not legal in the current phase; nothing was sent.
    Ignored {
        action: ControlAction,
        phase: CyclePhase,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    remote: Arc<dyn RemoteService>,
    store: SharedSnapshot,
    exporter: ArtifactExporter,
}

impl Dispatcher {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        store: SharedSnapshot,
        exporter: ArtifactExporter,
    ) -> Self {
        Self {
            remote,
            store,
            exporter,
        }
    }

    /// Starts a run. Local state of the previous run is cleared before the
    /// request goes out and polls are held off until the remote answers; a
    /// rejected request rolls the intent back.
    pub async fn submit(&self, source: PolicySource) -> Result<DispatchOutcome, DispatchError> {
        let epoch = {
            let mut store = self.store.lock();
            let phase = store.phase();
            if !phase.allows(ControlAction::Submit) {
                return Ok(ignored(ControlAction::Submit, phase));
            }
            store.begin_run()
        };
        info!(
            "policy_submitted: epoch={epoch} source={}",
            source.summary(60)
        );

        let result = match &source {
            PolicySource::Text(policy) => self
                .remote
                .submit_policy(policy)
                .await
                .map_err(DispatchError::Submit),
            PolicySource::File { filename, content } => self
                .remote
                .upload_policy(filename, content)
                .await
                .map_err(DispatchError::Upload),
        };
        if let Err(err) = result {
            if self.store.lock().revert_submit(epoch) {
                warn!("submit_reverted: epoch={epoch} err={err}");
            }
            return Err(err);
        }
        self.store.lock().acknowledge_submit(epoch);
        Ok(DispatchOutcome::Sent(ControlAction::Submit))
    }

    pub async fn submit_text(&self, policy: &str) -> Result<DispatchOutcome, DispatchError> {
        let source = PolicySource::text(policy)?;
        self.submit(source).await
    }

    pub async fn pause(&self) -> Result<DispatchOutcome, DispatchError> {
        if let Some(ignored) = self.gate(ControlAction::Pause) {
            return Ok(ignored);
        }
        self.remote.pause_cycle().await.map_err(|err| {
            warn!("pause_failed: {err}");
            DispatchError::Pause(err)
        })?;
        Ok(DispatchOutcome::Sent(ControlAction::Pause))
    }

    pub async fn resume(&self) -> Result<DispatchOutcome, DispatchError> {
        if let Some(ignored) = self.gate(ControlAction::Resume) {
            return Ok(ignored);
        }
        self.remote.continue_cycle().await.map_err(|err| {
            warn!("resume_failed: {err}");
            DispatchError::Resume(err)
        })?;
        Ok(DispatchOutcome::Sent(ControlAction::Resume))
    }

    /// Ends a paused run and saves the artifact the remote answers with.
    pub async fn stop_and_export(&self) -> Result<DispatchOutcome, DispatchError> {
        if let Some(ignored) = self.gate(ControlAction::StopAndExport) {
            return Ok(ignored);
        }
        let artifact = self.terminate().await?;
        self.save(&artifact).await
    }

    /// Saves the final artifact of a completed run without changing it.
    pub async fn export(&self) -> Result<DispatchOutcome, DispatchError> {
        if let Some(ignored) = self.gate(ControlAction::Export) {
            return Ok(ignored);
        }
        let artifact = self
            .remote
            .download_policy()
            .await
            .map_err(DispatchError::Download)?;
        self.save(&artifact).await
    }

    pub async fn set_fast_mode(&self, fast_demo: bool) -> Result<PipelineConfig, DispatchError> {
        self.remote
            .update_config(fast_demo)
            .await
            .map_err(DispatchError::Config)?;
        // re-read so the view shows what the remote actually holds
        let config = self.remote.config().await.map_err(DispatchError::Config)?;
        info!("config_updated: fast_demo={}", config.fast_demo);
        Ok(config)
    }

    pub async fn fetch_config(&self) -> Result<PipelineConfig, RemoteError> {
        self.remote.config().await
    }

    pub async fn agents(&self) -> Result<Vec<AgentProfile>, RemoteError> {
        self.remote.agents().await
    }

    /// Ends the run and returns the artifact the remote answered with. Not
    /// gated; [`Dispatcher::stop_and_export`] is the phase-checked entry.
    pub async fn terminate(&self) -> Result<Artifact, DispatchError> {
        let artifact = self
            .remote
            .stop_and_download()
            .await
            .map_err(DispatchError::Terminate)?;
        info!("run_terminated: bytes={}", artifact.as_bytes().len());
        Ok(artifact)
    }

    async fn save(&self, artifact: &Artifact) -> Result<DispatchOutcome, DispatchError> {
        let exporter = self.exporter.clone();
        let owned = artifact.clone();
        let path = tokio::task::spawn_blocking(move || exporter.save(&owned))
            .await
            .map_err(|_| DispatchError::Export(ExportError::Cancelled))??;
        Ok(DispatchOutcome::Exported {
            path,
            bytes: artifact.as_bytes().len(),
        })
    }

    fn gate(&self, action: ControlAction) -> Option<DispatchOutcome> {
        let phase = self.store.phase();
        if phase.allows(action) {
            None
        } else {
            Some(ignored(action, phase))
        }
    }
}

fn ignored(action: ControlAction, phase: CyclePhase) -> DispatchOutcome {
    info!("action_ignored: action={action} phase={phase}");
    DispatchOutcome::Ignored { action, phase }
}
