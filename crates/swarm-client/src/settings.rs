//! Local connection settings: flags and environment first, then the optional
//! `config.toml`, then built-in defaults.

use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::remote::DEFAULT_API_URL;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub export_dir: Option<PathBuf>,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub api_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub poll_interval: Duration,
    pub export_dir: PathBuf,
}

impl Settings {
    pub fn load(overrides: SettingsOverrides) -> Self {
        let path = config_path();
        let file = match load_config(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!("config_read_failed: {}: {err}", path.display());
                FileConfig::default()
            }
        };
        Self::resolve(overrides, file)
    }

    pub fn resolve(overrides: SettingsOverrides, file: FileConfig) -> Self {
        let api_url = overrides
            .api_url
            .or(file.api_url)
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let poll_interval = overrides
            .poll_interval_ms
            .or(file.poll_interval_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let export_dir = overrides
            .export_dir
            .or(file.export_dir)
            .unwrap_or_else(default_export_dir);
        Self {
            api_url,
            poll_interval,
            export_dir,
        }
    }
}

/// A missing file is not an error; a malformed one falls back to defaults.
pub fn load_config(path: &Path) -> io::Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    let config = toml::from_str(&contents).unwrap_or_else(|err| {
        warn!("config_parse_failed: {}: {err}", path.display());
        FileConfig::default()
    });
    Ok(config)
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = env::var("SWARM_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    config_dir().join("swarm/config.toml")
}

fn config_dir() -> PathBuf {
    if let Ok(path) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(path);
    }
    home_dir().join(".config")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn default_export_dir() -> PathBuf {
    let downloads = home_dir().join("Downloads");
    if downloads.is_dir() {
        downloads
    } else {
        PathBuf::from(".")
    }
}
