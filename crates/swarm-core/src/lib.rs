use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

pub mod cycle;
pub mod feed;
pub mod policy;
pub mod snapshot;

pub use cycle::{ControlAction, CyclePhase};
pub use feed::{FeedView, ReconcileOutcome, ScrollViewport};
pub use policy::{PolicyInputError, PolicySource};
pub use snapshot::{
    ApplyReport, PollBatch, RunIntent, SharedSnapshot, SnapshotField, SnapshotStore,
};

/// Upper bound on refinement rounds the remote pipeline runs for one policy.
pub const MAX_ITERATIONS: u32 = 3;
/// Role the remote pipeline uses for its own bookkeeping lines.
pub const SYSTEM_ROLE: &str = "System";
pub const ARTIFACT_FILE_NAME: &str = "policy_final.md";
pub const ARTIFACT_MIME: &str = "text/markdown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Population {
    Citizen,
    Senate,
    Architect,
    System,
}

impl Population {
    pub fn as_str(self) -> &'static str {
        match self {
            Population::Citizen => "citizen",
            Population::Senate => "senate",
            Population::Architect => "architect",
            Population::System => "system",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Population::Citizen => "Citizen Debate",
            Population::Senate => "Senate Debate",
            Population::Architect => "Architect Analysis",
            Population::System => "System",
        }
    }
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independently paginated log source on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Citizen,
    Senate,
    Architect,
}

impl LogStream {
    pub const ALL: [LogStream; 3] = [LogStream::Citizen, LogStream::Senate, LogStream::Architect];

    pub fn population(self) -> Population {
        match self {
            LogStream::Citizen => Population::Citizen,
            LogStream::Senate => Population::Senate,
            LogStream::Architect => Population::Architect,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.population().as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub agent: String,
    pub role: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Stamped by the reader from the stream the entry arrived on; the remote
    /// never sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<Population>,
}

impl LogEntry {
    pub fn new(agent: impl Into<String>, role: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            role: role.into(),
            message: message.into(),
            score: None,
            population: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == SYSTEM_ROLE
    }

    pub fn tagged(mut self, stream: LogStream) -> Self {
        self.population = Some(if self.is_system() {
            Population::System
        } else {
            stream.population()
        });
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub iteration: u32,
    pub citizen_score: f64,
    pub senate_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunStatus {
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub complete: bool,
}

impl RunStatus {
    /// `complete` wins when the remote reports both flags.
    pub fn is_paused(&self) -> bool {
        self.paused && !self.complete
    }
}

/// Synthesized output of a run, kept as the exact bytes the remote sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Artifact {
    bytes: Vec<u8>,
}

impl Artifact {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub fast_demo: bool,
    #[serde(default)]
    pub max_exchanges: u32,
    #[serde(default)]
    pub max_senate_exchanges: u32,
}

impl PipelineConfig {
    pub fn speed_label(&self) -> &'static str {
        if self.fast_demo {
            "fast"
        } else {
            "full"
        }
    }
}
