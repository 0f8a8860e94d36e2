//! Error types for reconciliation

use chrono::{DateTime, Utc};

/// Reconciliation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Server moved past the local base version; a push would overwrite it
    #[error(
        "project {project} changed on the server ({} files); update before uploading",
        paths.len()
    )]
    Conflict {
        /// Full project name
        project: String,
        /// Server timestamp the local copy is based on
        local_updated: Option<DateTime<Utc>>,
        /// Current server timestamp
        server_updated: Option<DateTime<Utc>>,
        /// Paths changed on the server since the local base
        paths: Vec<String>,
    },
}

impl ReconcileError {
    /// Paths involved in the conflict
    #[must_use]
    pub fn paths(&self) -> &[String] {
        match self {
            Self::Conflict { paths, .. } => paths,
        }
    }

    /// Whether the conflict can be cleared by updating first
    #[inline]
    #[must_use]
    pub fn is_resolvable_by_update(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
