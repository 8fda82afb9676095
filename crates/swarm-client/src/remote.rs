//! Contract with the remote pipeline service and its HTTP implementation.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use swarm_core::{AgentProfile, Artifact, LogEntry, LogStream, Metric, PipelineConfig, RunStatus};
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status from {path}: {status} body={body}")]
    UnexpectedStatus {
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("unexpected payload from {path}: {reason}")]
    Payload { path: String, reason: String },
    #[error("remote rejected request: {0}")]
    Rejected(String),
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn log_stream(&self, stream: LogStream) -> Result<Vec<LogEntry>, RemoteError>;
    async fn metrics(&self) -> Result<Vec<Metric>, RemoteError>;
    async fn status(&self) -> Result<RunStatus, RemoteError>;
    /// Artifact as it appears while polling; empty until the run produced one.
    async fn report(&self) -> Result<Artifact, RemoteError>;
    async fn agents(&self) -> Result<Vec<AgentProfile>, RemoteError>;
    async fn config(&self) -> Result<PipelineConfig, RemoteError>;

    async fn submit_policy(&self, policy: &str) -> Result<(), RemoteError>;
    async fn upload_policy(&self, filename: &str, content: &str) -> Result<(), RemoteError>;
    async fn pause_cycle(&self) -> Result<(), RemoteError>;
    async fn continue_cycle(&self) -> Result<(), RemoteError>;
    /// Terminates the run and answers with the artifact in the same round trip.
    async fn stop_and_download(&self) -> Result<Artifact, RemoteError>;
    /// Read-only download of the final artifact.
    async fn download_policy(&self) -> Result<Artifact, RemoteError>;
    async fn update_config(&self, fast_demo: bool) -> Result<PipelineConfig, RemoteError>;
}

pub fn stream_path(stream: LogStream) -> &'static str {
    match stream {
        LogStream::Citizen => "/citizen-logs",
        LogStream::Senate => "/senate-logs",
        LogStream::Architect => "/architect-logs",
    }
}

#[derive(Debug, Deserialize)]
struct ReportPayload {
    #[serde(default)]
    report: String,
}

#[derive(Debug, Deserialize)]
struct StopPayload {
    policy: String,
}

#[derive(Debug, Deserialize)]
struct AckPayload {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigUpdatePayload {
    config: PipelineConfig,
}

#[derive(Clone)]
pub struct HttpRemote {
    http: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
    {
        let res = self.http.get(self.url(path)).send().await?;
        decode_json(path, res).await
    }

    async fn post(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, RemoteError> {
        let res = self.http.post(self.url(path)).query(query).send().await?;
        ensure_success(path, res).await
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn log_stream(&self, stream: LogStream) -> Result<Vec<LogEntry>, RemoteError> {
        self.get_json(stream_path(stream)).await
    }

    async fn metrics(&self) -> Result<Vec<Metric>, RemoteError> {
        self.get_json("/metrics").await
    }

    async fn status(&self) -> Result<RunStatus, RemoteError> {
        self.get_json("/status").await
    }

    async fn report(&self) -> Result<Artifact, RemoteError> {
        let payload: ReportPayload = self.get_json("/report").await?;
        Ok(Artifact::from_text(payload.report))
    }

    async fn agents(&self) -> Result<Vec<AgentProfile>, RemoteError> {
        self.get_json("/agents").await
    }

    async fn config(&self) -> Result<PipelineConfig, RemoteError> {
        self.get_json("/config").await
    }

    async fn submit_policy(&self, policy: &str) -> Result<(), RemoteError> {
        self.post("/api/submit-policy", &[("policy", policy)]).await?;
        Ok(())
    }

    async fn upload_policy(&self, filename: &str, content: &str) -> Result<(), RemoteError> {
        let path = "/api/upload-policy";
        let res = self
            .post(path, &[("file", content), ("filename", filename)])
            .await?;
        let ack: AckPayload = decode_json(path, res).await?;
        if ack.status == "error" {
            return Err(RemoteError::Rejected(
                ack.message.unwrap_or_else(|| "upload rejected".to_string()),
            ));
        }
        Ok(())
    }

    async fn pause_cycle(&self) -> Result<(), RemoteError> {
        self.post("/api/pause-cycle", &[]).await?;
        Ok(())
    }

    async fn continue_cycle(&self) -> Result<(), RemoteError> {
        self.post("/api/continue-cycle", &[]).await?;
        Ok(())
    }

    async fn stop_and_download(&self) -> Result<Artifact, RemoteError> {
        let path = "/api/stop-and-download";
        let res = self.post(path, &[]).await?;
        let payload: StopPayload = decode_json(path, res).await?;
        Ok(Artifact::from_text(payload.policy))
    }

    async fn download_policy(&self) -> Result<Artifact, RemoteError> {
        let path = "/api/download-policy";
        let res = self.http.get(self.url(path)).send().await?;
        let res = ensure_success(path, res).await?;
        let bytes = res.bytes().await?;
        Ok(Artifact::from_bytes(bytes.to_vec()))
    }

    async fn update_config(&self, fast_demo: bool) -> Result<PipelineConfig, RemoteError> {
        let path = "/config";
        let flag = if fast_demo { "true" } else { "false" };
        let res = self.post(path, &[("fast_demo", flag)]).await?;
        let payload: ConfigUpdatePayload = decode_json(path, res).await?;
        Ok(payload.config)
    }
}

async fn ensure_success(path: &str, res: Response) -> Result<Response, RemoteError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(RemoteError::UnexpectedStatus {
        path: path.to_string(),
        status,
        body,
    })
}

/// Shape mismatches surface as [`RemoteError::Payload`] so callers can treat
/// them like any other failed read.
async fn decode_json<T>(path: &str, res: Response) -> Result<T, RemoteError>
where
    T: DeserializeOwned,
{
    let res = ensure_success(path, res).await?;
    let bytes = res.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| RemoteError::Payload {
        path: path.to_string(),
        reason: err.to_string(),
    })
}
