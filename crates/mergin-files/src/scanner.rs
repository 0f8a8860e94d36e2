//! Project directory scanner
//!
//! Computes local file inventories for a project directory. Scans are
//! synchronous and tolerant: files that vanish or cannot be read while the
//! scan runs are left out instead of failing the whole scan.

use crate::checksum::Checksum;
use crate::record::{FileInventory, FileRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Directory inside each project holding sync metadata; never synced itself
pub const METADATA_DIR: &str = ".mergin";

/// Suffixes of transient files that never take part in a sync
///
/// SQLite journals next to geopackages and QGIS backup project files.
pub const DEFAULT_IGNORED_SUFFIXES: &[&str] = &["gpkg-shm", "gpkg-wal", "qgs~", "qgz~"];

/// Set of file-name suffixes excluded from scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreSet {
    suffixes: Vec<String>,
}

impl IgnoreSet {
    /// Create ignore set from suffixes
    #[must_use]
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a relative path is excluded
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        self.suffixes.iter().any(|s| path.ends_with(s.as_str()))
    }

    /// Configured suffixes
    #[inline]
    #[must_use]
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_SUFFIXES.iter().copied())
    }
}

/// Scanner for project directories
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    ignore: IgnoreSet,
}

impl Scanner {
    /// Create scanner with an ignore set
    #[inline]
    #[must_use]
    pub fn new(ignore: IgnoreSet) -> Self {
        Self { ignore }
    }

    /// Get ignore set
    #[inline]
    #[must_use]
    pub fn ignore_set(&self) -> &IgnoreSet {
        &self.ignore
    }

    /// Relative paths of all syncable files under `project_path`
    ///
    /// Directories, the metadata directory and ignored suffixes are
    /// skipped. A missing root yields an empty set.
    #[must_use]
    pub fn list_files(&self, project_path: &Path) -> BTreeSet<String> {
        let mut found = Vec::new();
        walk(project_path, &mut found);

        found
            .into_iter()
            .filter_map(|abs| relative_path(project_path, &abs))
            .filter(|rel| !self.ignore.is_ignored(rel))
            .collect()
    }

    /// Checksum of a single file, `None` when it cannot be read
    #[must_use]
    pub fn checksum(&self, file_path: &Path) -> Option<Checksum> {
        match Checksum::of_file(file_path) {
            Ok(sum) => Some(sum),
            Err(e) => {
                tracing::warn!("skipping unreadable file: {}", e);
                None
            }
        }
    }

    /// Newest modification time of any syncable file in the tree
    #[must_use]
    pub fn last_modified(&self, project_path: &Path) -> Option<DateTime<Utc>> {
        self.list_files(project_path)
            .iter()
            .filter_map(|rel| fs::metadata(project_path.join(rel)).ok())
            .filter_map(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from)
            .max()
    }

    /// Record for one relative path, `None` when missing or unreadable
    #[must_use]
    pub fn record(&self, project_path: &Path, rel: &str) -> Option<FileRecord> {
        let abs = project_path.join(rel);
        let meta = fs::metadata(&abs).ok()?;
        if !meta.is_file() {
            return None;
        }
        let checksum = self.checksum(&abs)?;
        let mut record = FileRecord::new(rel, checksum, meta.len());
        if let Ok(mtime) = meta.modified() {
            record = record.with_mtime(DateTime::<Utc>::from(mtime));
        }
        Some(record)
    }

    /// Full inventory (paths, checksums, sizes, mtimes) of a project
    #[must_use]
    pub fn inventory(&self, project_path: &Path) -> FileInventory {
        let inventory: FileInventory = self
            .list_files(project_path)
            .iter()
            .filter_map(|rel| self.record(project_path, rel))
            .collect();

        tracing::debug!(
            "scanned {}: {} files, {} bytes",
            project_path.display(),
            inventory.len(),
            inventory.total_size()
        );
        inventory
    }
}

/// Resolve a server-style relative path under a project root
///
/// Rejects absolute paths and `..` components so a file list can never
/// address anything outside the project.
#[must_use]
pub fn resolve_in_project(project_path: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    let safe = rel_path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if rel.is_empty() || !safe {
        return None;
    }
    Some(project_path.join(rel_path))
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            if entry.file_name() == METADATA_DIR {
                continue;
            }
            walk(&path, out);
        } else if file_type.is_file() {
            out.push(path);
        }
    }
}

fn relative_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_set_defaults() {
        let ignore = IgnoreSet::default();
        assert!(ignore.is_ignored("data/survey.gpkg-wal"));
        assert!(ignore.is_ignored("project.qgs~"));
        assert!(!ignore.is_ignored("survey.gpkg"));
    }

    #[test]
    fn resolve_rejects_escaping_paths() {
        let root = Path::new("/data/proj");
        assert!(resolve_in_project(root, "../secret").is_none());
        assert!(resolve_in_project(root, "/etc/passwd").is_none());
        assert!(resolve_in_project(root, "").is_none());
        assert_eq!(
            resolve_in_project(root, "photos/a.jpg"),
            Some(PathBuf::from("/data/proj/photos/a.jpg"))
        );
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let root = Path::new("/data/proj");
        let abs = root.join("a").join("b.txt");
        assert_eq!(relative_path(root, &abs).as_deref(), Some("a/b.txt"));
    }
}
