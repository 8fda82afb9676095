//! Remote access, polling, command dispatch and export for the swarm
//! console and CLI.

pub mod dispatcher;
pub mod export;
pub mod fakes;
pub mod poller;
pub mod remote;
pub mod settings;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use export::{ArtifactExporter, ArtifactSink, DirectorySink, Download, ExportError};
pub use poller::{fetch_batch, PollEvent, Poller, PollerHandle, DEFAULT_POLL_INTERVAL};
pub use remote::{HttpRemote, RemoteError, RemoteService, DEFAULT_API_URL};
pub use settings::{FileConfig, Settings, SettingsOverrides};
