//! Direction-parameterized file reconciliation
//!
//! The same comparison runs for pulls and pushes; only the authoritative
//! side changes. Given the local inventory `L`, the server inventory `S`
//! and the server file list of the previous sync `B`:
//!
//! | case | [`Direction::Download`] | [`Direction::Upload`] |
//! |---|---|---|
//! | in `S`, not in `L` | added (fetch) | removed (delete on server) |
//! | in `L`, not in `S` | obsolete if unchanged since `B`, else skipped | added (push) |
//! | in both, checksums differ | updated (fetch) | updated (push) |
//! | in both, same checksum | skipped | skipped |

use mergin_files::{FileInventory, FileRecord};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Which side is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Pull: the server copy wins
    Download,
    /// Push: the local copy wins
    Upload,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

/// Files to transfer to align a local and a server copy
///
/// For [`Direction::Download`] `added`/`updated` hold server records to
/// fetch and `obsolete` holds local paths to delete once the whole
/// transfer succeeded. For [`Direction::Upload`] `added`/`updated` hold
/// local records to push and `removed` holds server records to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Authoritative side
    pub direction: Direction,
    /// Files missing on the receiving side
    pub added: Vec<FileRecord>,
    /// Files whose content differs
    pub updated: Vec<FileRecord>,
    /// Server files to delete (upload only)
    pub removed: Vec<FileRecord>,
    /// Local paths to delete after a successful download
    pub obsolete: Vec<String>,
}

impl FileDiff {
    /// Empty diff
    #[inline]
    #[must_use]
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            obsolete: Vec::new(),
        }
    }

    /// Compare local and server inventories
    ///
    /// # Arguments
    /// * `local` - files on disk
    /// * `server` - files the server reports
    /// * `base` - server files at the previous successful sync
    /// * `direction` - which side is authoritative
    #[must_use]
    pub fn compute(
        local: &FileInventory,
        server: &FileInventory,
        base: &FileInventory,
        direction: Direction,
    ) -> Self {
        let mut diff = Self::empty(direction);

        let (source, target) = match direction {
            Direction::Download => (server, local),
            Direction::Upload => (local, server),
        };

        for record in source {
            match target.get(&record.path) {
                None => diff.added.push(record.clone()),
                Some(existing) if !existing.same_content(record) => {
                    diff.updated.push(record.clone());
                }
                Some(_) => {}
            }
        }

        for record in target {
            if source.contains(&record.path) {
                continue;
            }
            match direction {
                Direction::Upload => diff.removed.push(record.clone()),
                Direction::Download => {
                    // Only files the server used to have, untouched locally
                    // since then, are safe to delete.
                    let unchanged_since_sync = base
                        .get(&record.path)
                        .is_some_and(|synced| synced.same_content(record));
                    if unchanged_since_sync {
                        diff.obsolete.push(record.path.clone());
                    }
                }
            }
        }

        diff
    }

    /// Whether nothing needs to change
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.obsolete.is_empty()
    }

    /// Records whose content must travel (added then updated)
    pub fn transfers(&self) -> impl Iterator<Item = &FileRecord> {
        self.added.iter().chain(self.updated.iter())
    }

    /// Total bytes that must travel
    #[must_use]
    pub fn transfer_size(&self) -> u64 {
        self.transfers().map(|f| f.size).sum()
    }

    /// Every path touched by the diff
    #[must_use]
    pub fn changed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .transfers()
            .chain(self.removed.iter())
            .map(|f| f.path.clone())
            .chain(self.obsolete.iter().cloned())
            .collect();
        paths.sort();
        paths
    }
}
