//! Project data model
//!
//! [`RemoteProject`] is the server's view of a project decorated with the
//! state of the local copy; [`LocalProject`] is a directory under the data
//! dir; [`ProjectEntry`] pairs the two.

use crate::pending::TransferStatus;
use chrono::{DateTime, Utc};
use mergin_api::{ProjectId, ProjectSummary};
use mergin_files::{ProjectMetadata, Scanner};
use mergin_reconcile::{project_status, ProjectStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project directory under the data dir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProject {
    /// Project directory
    pub path: PathBuf,
    /// Last-synced state, absent for never-synced directories
    pub metadata: Option<ProjectMetadata>,
}

impl LocalProject {
    /// Read a project directory
    #[must_use]
    pub fn open(path: &Path) -> Self {
        let metadata = match ProjectMetadata::load(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("ignoring metadata of {}: {}", path.display(), e);
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            metadata,
        }
    }

    /// Server identity, when the project was ever synced
    #[must_use]
    pub fn id(&self) -> Option<ProjectId> {
        self.metadata
            .as_ref()
            .filter(|m| !m.namespace.is_empty() && !m.name.is_empty())
            .map(|m| ProjectId::new(&m.namespace, &m.name))
    }

    /// Local identity: the directory name
    #[must_use]
    pub fn local_id(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Server timestamp of the synced version
    #[must_use]
    pub fn local_updated(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().and_then(|m| m.updated)
    }

    /// Time of the last successful sync
    #[must_use]
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().and_then(|m| m.last_sync)
    }

    /// Synced server version
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.version.as_deref())
    }

    /// Status against a server timestamp, scanning the directory for edits
    #[must_use]
    pub fn status(&self, server_updated: Option<DateTime<Utc>>, scanner: &Scanner) -> ProjectStatus {
        project_status(
            self.local_updated(),
            server_updated,
            self.last_sync(),
            scanner.last_modified(&self.path),
        )
    }
}

/// Server project decorated with local state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProject {
    pub id: ProjectId,
    pub tags: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    /// Server timestamp of the local copy
    pub updated: Option<DateTime<Utc>>,
    /// Current server timestamp
    pub server_updated: Option<DateTime<Utc>>,
    pub last_sync: Option<DateTime<Utc>>,
    /// Current server version
    pub version: Option<String>,
    pub size: u64,
    pub files_count: u64,
    pub creator: Option<i64>,
    pub writers: Vec<i64>,
    pub status: ProjectStatus,
    /// Derived from the pending-transfer table when the view is built
    pub pending: bool,
    /// Transfer progress in `0..=1` while pending
    pub progress: f64,
}

impl RemoteProject {
    /// Build the view of a listed project
    #[must_use]
    pub fn from_summary(
        summary: &ProjectSummary,
        local: Option<&LocalProject>,
        transfer: Option<TransferStatus>,
        scanner: &Scanner,
    ) -> Self {
        let status = local.map_or(ProjectStatus::NoVersion, |l| l.status(summary.updated, scanner));
        Self {
            id: summary.id(),
            tags: summary.tags.clone(),
            created: summary.created,
            updated: local.and_then(LocalProject::local_updated),
            server_updated: summary.updated,
            last_sync: local.and_then(LocalProject::last_sync),
            version: summary.version.clone(),
            size: summary.size,
            files_count: summary.files_count,
            creator: summary.creator,
            writers: summary.writers.clone(),
            status,
            pending: transfer.is_some(),
            progress: transfer.map_or(0.0, |t| t.progress()),
        }
    }

    /// Apply a progress event; negative progress means cancelled
    pub fn apply_progress(&mut self, progress: f64) {
        if progress < 0.0 {
            self.pending = false;
            self.progress = 0.0;
        } else {
            self.pending = true;
            self.progress = progress.min(1.0);
        }
    }
}

/// Unified list entry: local copy, server project, or both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub local: Option<LocalProject>,
    pub remote: Option<RemoteProject>,
}

impl ProjectEntry {
    /// Identity: server full name when known, else the local id
    #[must_use]
    pub fn id(&self) -> String {
        match (&self.remote, &self.local) {
            (Some(remote), _) => remote.id.to_string(),
            (None, Some(local)) => local.id().map_or_else(|| local.local_id(), |id| id.to_string()),
            (None, None) => String::new(),
        }
    }

    /// Whether the entry has a server side
    #[inline]
    #[must_use]
    pub fn is_mergin(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether the entry has a local copy
    #[inline]
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }

    /// Whether a transfer is running
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.remote.as_ref().is_some_and(|r| r.pending)
    }

    /// Status of the server side, `NoVersion` for local-only entries
    #[must_use]
    pub fn status(&self) -> ProjectStatus {
        self.remote.as_ref().map_or(ProjectStatus::NoVersion, |r| r.status)
    }

    /// Whether `id` names this entry (local id first, then server id)
    #[must_use]
    pub fn matches(&self, id: &str) -> bool {
        let local = self
            .local
            .as_ref()
            .is_some_and(|l| l.local_id() == id || l.id().is_some_and(|pid| pid.to_string() == id));
        local || self.remote.as_ref().is_some_and(|r| r.id.to_string() == id)
    }
}
