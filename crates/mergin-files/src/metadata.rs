//! Per-project sync metadata
//!
//! Every synced project keeps `<project>/.mergin/mergin.json` recording the
//! server version it was last synced to, when that happened, and the server
//! file list at that moment. The file list is the "previous sync" set used
//! to tell server-side deletions apart from local additions.

use crate::error::ScanError;
use crate::record::{FileInventory, FileRecord};
use crate::scanner::METADATA_DIR;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata file name inside [`METADATA_DIR`]
pub const METADATA_FILE: &str = "mergin.json";

/// Last-synced state of a local project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Project namespace
    pub namespace: String,
    /// Project name
    pub name: String,
    /// Server version string of the local copy (e.g. `v3`)
    #[serde(default)]
    pub version: Option<String>,
    /// Server `updated` timestamp of the local copy
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    /// Time of the last successful download/update/upload
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Server file list at the last successful sync
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl ProjectMetadata {
    /// Create metadata for a project that was never synced
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: None,
            updated: None,
            last_sync: None,
            files: Vec::new(),
        }
    }

    /// Path of the metadata file for a project directory
    #[must_use]
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(METADATA_DIR).join(METADATA_FILE)
    }

    /// Load metadata; `Ok(None)` if the project has none
    ///
    /// # Errors
    /// IO failures other than not-found, or undecodable JSON
    pub fn load(project_dir: &Path) -> Result<Option<Self>, ScanError> {
        let path = Self::path_for(project_dir);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScanError::io(path, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| ScanError::Metadata { path, source })
    }

    /// Write metadata, creating the metadata directory if needed
    ///
    /// # Errors
    /// IO failures while writing
    pub fn save(&self, project_dir: &Path) -> Result<(), ScanError> {
        let path = Self::path_for(project_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ScanError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|source| ScanError::Metadata { path: path.clone(), source })?;
        fs::write(&path, json).map_err(|e| ScanError::io(&path, e))
    }

    /// Server files of the last sync as an inventory
    #[must_use]
    pub fn synced_files(&self) -> FileInventory {
        self.files.iter().cloned().collect()
    }

    /// Full project name `namespace/name`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProjectMetadata::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn metadata_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = ProjectMetadata::new("lutra", "trees");
        meta.version = Some("v2".to_string());
        meta.updated = Some(Utc::now());
        meta.files.push(FileRecord::from_bytes("trees.gpkg", b"gpkg"));

        meta.save(dir.path()).unwrap();
        let loaded = ProjectMetadata::load(dir.path()).unwrap().unwrap();

        assert_eq!(loaded, meta);
        assert_eq!(loaded.full_name(), "lutra/trees");
        assert!(loaded.synced_files().contains("trees.gpkg"));
    }

    #[test]
    fn metadata_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = ProjectMetadata::path_for(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();

        let result = ProjectMetadata::load(dir.path());
        assert!(matches!(result, Err(ScanError::Metadata { .. })));
    }
}
