//! Hands artifact bytes to the local environment's file-save mechanism.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swarm_core::{Artifact, ARTIFACT_FILE_NAME, ARTIFACT_MIME};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: the artifact is empty")]
    EmptyArtifact,
    #[error("save location unavailable: {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("save cancelled")]
    Cancelled,
}

/// Byte buffer plus the metadata a save dialog needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Download {
    pub fn policy(artifact: &Artifact) -> Self {
        Self {
            file_name: ARTIFACT_FILE_NAME.to_string(),
            mime: ARTIFACT_MIME.to_string(),
            bytes: artifact.as_bytes().to_vec(),
        }
    }
}

pub trait ArtifactSink: Send + Sync {
    fn save(&self, download: &Download) -> Result<PathBuf, ExportError>;
}

/// Saves into a directory. Writes go to a staged temp file that is renamed
/// into place; the temp file is removed on every path that does not finish.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for DirectorySink {
    fn save(&self, download: &Download) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.dir).map_err(|source| ExportError::Unavailable {
            path: self.dir.clone(),
            source,
        })?;
        let target = unique_target(&self.dir, &download.file_name);
        let mut staged = StagedFile::create(&target)?;
        staged.write_all(&download.bytes)?;
        staged.persist()
    }
}

struct StagedFile {
    temp_path: PathBuf,
    target: PathBuf,
    file: Option<File>,
    persisted: bool,
}

impl StagedFile {
    fn create(target: &Path) -> Result<Self, ExportError> {
        let temp_path = match target.file_name() {
            Some(name) => target.with_file_name(format!(".{}.part", name.to_string_lossy())),
            None => target.with_extension("part"),
        };
        let file = File::create(&temp_path).map_err(|source| ExportError::Unavailable {
            path: temp_path.clone(),
            source,
        })?;
        Ok(Self {
            temp_path,
            target: target.to_path_buf(),
            file: Some(file),
            persisted: false,
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ExportError> {
        let Some(file) = self.file.as_mut() else {
            return Err(ExportError::Cancelled);
        };
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|source| ExportError::Write {
                path: self.temp_path.clone(),
                source,
            })
    }

    fn persist(mut self) -> Result<PathBuf, ExportError> {
        drop(self.file.take());
        fs::rename(&self.temp_path, &self.target).map_err(|source| ExportError::Write {
            path: self.target.clone(),
            source,
        })?;
        self.persisted = true;
        Ok(self.target.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        drop(self.file.take());
        if let Err(err) = fs::remove_file(&self.temp_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("export_cleanup_failed: {}: {err}", self.temp_path.display());
            }
        }
    }
}

/// Picks `name`, then `stem-1.ext`, `stem-2.ext`, ... so earlier exports are
/// never overwritten.
fn unique_target(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut index = 1usize;
    loop {
        let file_name = match &ext {
            Some(ext) => format!("{stem}-{index}.{ext}"),
            None => format!("{stem}-{index}"),
        };
        let candidate = dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Front door for both export triggers: the read-only download of a
/// completed run and the stop-and-export of a paused one.
#[derive(Clone)]
pub struct ArtifactExporter {
    sink: Arc<dyn ArtifactSink>,
}

impl ArtifactExporter {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self { sink }
    }

    pub fn to_directory(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectorySink::new(dir)))
    }

    pub fn save(&self, artifact: &Artifact) -> Result<PathBuf, ExportError> {
        if artifact.is_empty() {
            return Err(ExportError::EmptyArtifact);
        }
        let download = Download::policy(artifact);
        let path = self.sink.save(&download)?;
        info!(
            "artifact_exported: path={} bytes={} mime={}",
            path.display(),
            download.bytes.len(),
            download.mime
        );
        Ok(path)
    }
}
