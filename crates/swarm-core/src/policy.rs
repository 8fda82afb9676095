use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

#[derive(Debug, Error)]
pub enum PolicyInputError {
    #[error("policy text is empty")]
    Empty,
    #[error("unsupported policy file '{0}': expected .md, .markdown or .txt")]
    UnsupportedExtension(String),
    #[error("policy file '{0}' is not valid UTF-8 text")]
    NotUtf8(String),
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validated input for starting a run: typed text or the contents of a
/// plain-text/markdown file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    Text(String),
    File { filename: String, content: String },
}

impl PolicySource {
    pub fn text(policy: impl Into<String>) -> Result<Self, PolicyInputError> {
        let policy = policy.into();
        if policy.trim().is_empty() {
            return Err(PolicyInputError::Empty);
        }
        Ok(PolicySource::Text(policy))
    }

    pub fn file(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, PolicyInputError> {
        let filename = filename.into();
        ensure_accepted_extension(&filename)?;
        let content =
            String::from_utf8(bytes).map_err(|_| PolicyInputError::NotUtf8(filename.clone()))?;
        if content.trim().is_empty() {
            return Err(PolicyInputError::Empty);
        }
        Ok(PolicySource::File { filename, content })
    }

    /// Checks the extension before touching the filesystem.
    pub fn read_file(path: &Path) -> Result<Self, PolicyInputError> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        ensure_accepted_extension(&filename)?;
        let bytes = std::fs::read(path).map_err(|source| PolicyInputError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::file(filename, bytes)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, PolicySource::File { .. })
    }

    pub fn content(&self) -> &str {
        match self {
            PolicySource::Text(policy) => policy,
            PolicySource::File { content, .. } => content,
        }
    }

    /// Short one-line label for status notes and logs.
    pub fn summary(&self, max: usize) -> String {
        match self {
            PolicySource::File { filename, .. } => ellipsize(filename, max),
            PolicySource::Text(policy) => {
                let first = policy.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
                ellipsize(first.trim(), max)
            }
        }
    }
}

pub fn is_accepted_file_name(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn ensure_accepted_extension(filename: &str) -> Result<(), PolicyInputError> {
    if is_accepted_file_name(filename) {
        Ok(())
    } else {
        Err(PolicyInputError::UnsupportedExtension(filename.to_string()))
    }
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = input.chars().take(keep).collect();
    out.push_str("...");
    out
}
