//! Project status rule
//!
//! A project's status is a pure function of four timestamps. Nothing else
//! may set it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Sync status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// No local copy was ever synced
    #[default]
    NoVersion,
    /// Local copy matches the server
    UpToDate,
    /// Server has a newer version
    OutOfDate,
    /// Local edits not yet pushed
    Modified,
}

impl ProjectStatus {
    /// All statuses
    pub const ALL: [ProjectStatus; 4] = [
        ProjectStatus::NoVersion,
        ProjectStatus::UpToDate,
        ProjectStatus::OutOfDate,
        ProjectStatus::Modified,
    ];

    /// Whether syncing this project means pulling from the server
    #[inline]
    #[must_use]
    pub fn needs_download(self) -> bool {
        matches!(self, Self::NoVersion | Self::OutOfDate)
    }

    /// Whether syncing this project means pushing to the server
    #[inline]
    #[must_use]
    pub fn needs_upload(self) -> bool {
        matches!(self, Self::Modified)
    }

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoVersion => "no_version",
            Self::UpToDate => "up_to_date",
            Self::OutOfDate => "out_of_date",
            Self::Modified => "modified",
        }
    }
}

impl Display for ProjectStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the status of a project
///
/// # Arguments
/// * `local_updated` - server version timestamp recorded for the local copy
/// * `server_updated` - server's current version timestamp
/// * `last_sync` - time of the last successful sync
/// * `last_modified` - newest modification time on disk
///
/// Rules, in order:
/// 1. no `local_updated` → [`ProjectStatus::NoVersion`]
/// 2. `server_updated > local_updated` → [`ProjectStatus::OutOfDate`]
/// 3. `last_modified > last_sync` → [`ProjectStatus::Modified`]
///    (any modification with no recorded sync counts)
/// 4. otherwise [`ProjectStatus::UpToDate`]
#[must_use]
pub fn project_status(
    local_updated: Option<DateTime<Utc>>,
    server_updated: Option<DateTime<Utc>>,
    last_sync: Option<DateTime<Utc>>,
    last_modified: Option<DateTime<Utc>>,
) -> ProjectStatus {
    let Some(local_updated) = local_updated else {
        return ProjectStatus::NoVersion;
    };

    if server_updated.is_some_and(|server| server > local_updated) {
        return ProjectStatus::OutOfDate;
    }

    match (last_modified, last_sync) {
        (Some(modified), Some(synced)) if modified > synced => ProjectStatus::Modified,
        (Some(_), None) => ProjectStatus::Modified,
        _ => ProjectStatus::UpToDate,
    }
}
