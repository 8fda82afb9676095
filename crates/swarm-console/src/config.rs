use clap::Parser;
use std::path::PathBuf;
use swarm_client::{Settings, SettingsOverrides};

#[derive(Debug, Parser)]
#[command(name = "swarm-console")]
#[command(about = "Terminal console for the policy swarm pipeline", long_about = None)]
pub struct Args {
    /// Base URL of the pipeline service
    #[arg(long, env = "SWARM_API_URL")]
    pub api_url: Option<String>,
    /// Milliseconds between polls
    #[arg(long, env = "SWARM_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,
    /// Directory exported policies are written to
    #[arg(long, env = "SWARM_EXPORT_DIR")]
    pub export_dir: Option<PathBuf>,
    /// Append logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    pub fn settings(&self) -> Settings {
        Settings::load(SettingsOverrides {
            api_url: self.api_url.clone(),
            poll_interval_ms: self.poll_interval_ms,
            export_dir: self.export_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_into_overrides() {
        let args = Args::parse_from([
            "swarm-console",
            "--api-url",
            "http://pipeline:8000",
            "--poll-interval-ms",
            "250",
            "--export-dir",
            "/tmp/exports",
        ]);
        assert_eq!(args.api_url.as_deref(), Some("http://pipeline:8000"));
        assert_eq!(args.poll_interval_ms, Some(250));
        assert_eq!(args.export_dir, Some(PathBuf::from("/tmp/exports")));
        assert!(args.log_file.is_none());
    }
}
