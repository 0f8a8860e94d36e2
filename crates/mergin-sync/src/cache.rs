//! Listing cache
//!
//! The last successful listing is kept in `<data_dir>/.mergin/projects.json`
//! so the projects list is available offline.

use crate::error::SyncError;
use mergin_api::ProjectSummary;
use std::path::{Path, PathBuf};

/// Cache file name inside the client state directory
pub const CACHE_FILE: &str = "projects.json";

/// JSON file holding the last listing
#[derive(Debug, Clone)]
pub struct ListingCache {
    path: PathBuf,
}

impl ListingCache {
    /// Cache stored in `<state_dir>/projects.json`
    #[must_use]
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(CACHE_FILE),
        }
    }

    /// Cache file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cached projects; a missing or corrupt cache is empty
    #[must_use]
    pub fn load(&self) -> Vec<ProjectSummary> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("cannot read {}: {}", self.path.display(), e);
                }
                return Vec::new();
            }
        };
        serde_json::from_slice(&data).unwrap_or_else(|e| {
            tracing::warn!("discarding corrupt listing cache: {}", e);
            Vec::new()
        })
    }

    /// Replace the cached listing
    ///
    /// # Errors
    /// Writing the cache failed
    pub fn save(&self, projects: &[ProjectSummary]) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(projects)
            .map_err(|e| SyncError::io(&self.path, std::io::Error::other(e)))?;
        std::fs::write(&self.path, json).map_err(|e| SyncError::io(&self.path, e))
    }
}
