//! Error types for project directory scanning

use std::path::PathBuf;

/// Errors raised while reading project files or metadata
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// IO error for a specific path
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path is not inside the project root
    #[error("{path} is outside project root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// Metadata file could not be decoded
    #[error("invalid metadata in {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ScanError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means the path simply does not exist
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
