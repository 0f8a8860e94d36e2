//! File records and inventories
//!
//! A [`FileRecord`] describes one project file either as found on disk or
//! as reported by the server. A [`FileInventory`] is a path-keyed set of
//! records; pairing a local and a server inventory drives reconciliation.

use crate::checksum::Checksum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// One project file: relative path, content checksum and size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the project root, `/` separated
    pub path: String,
    /// Content checksum
    pub checksum: Checksum,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Create a record without modification time
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>, checksum: Checksum, size: u64) -> Self {
        Self {
            path: path.into(),
            checksum,
            size,
            mtime: None,
        }
    }

    /// Create a record describing an in-memory buffer
    #[must_use]
    pub fn from_bytes(path: impl Into<String>, data: &[u8]) -> Self {
        Self::new(path, Checksum::compute(data), data.len() as u64)
    }

    /// With modification time
    #[inline]
    #[must_use]
    pub fn with_mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Whether both records carry the same content
    #[inline]
    #[must_use]
    pub fn same_content(&self, other: &FileRecord) -> bool {
        self.checksum == other.checksum
    }
}

/// Path-keyed set of file records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInventory {
    files: BTreeMap<String, FileRecord>,
}

impl FileInventory {
    /// Create empty inventory
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record with the same path
    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.files.insert(record.path.clone(), record)
    }

    /// Remove the record for a path
    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.files.remove(path)
    }

    /// Record for a path
    #[inline]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    /// Whether a path is present
    #[inline]
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of files
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the inventory has no files
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of all file sizes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }

    /// Iterate records in path order
    pub fn iter(&self) -> btree_map::Values<'_, String, FileRecord> {
        self.files.values()
    }

    /// Iterate paths in order
    pub fn paths(&self) -> btree_map::Keys<'_, String, FileRecord> {
        self.files.keys()
    }

    /// Clone records into a vector (path order)
    #[must_use]
    pub fn to_vec(&self) -> Vec<FileRecord> {
        self.files.values().cloned().collect()
    }
}

impl FromIterator<FileRecord> for FileInventory {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let mut inventory = Self::new();
        for record in iter {
            inventory.insert(record);
        }
        inventory
    }
}

impl<'a> IntoIterator for &'a FileInventory {
    type Item = &'a FileRecord;
    type IntoIter = btree_map::Values<'a, String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_replaces_same_path() {
        let mut inv = FileInventory::new();
        inv.insert(FileRecord::from_bytes("a.gpkg", b"one"));
        let old = inv.insert(FileRecord::from_bytes("a.gpkg", b"two"));

        assert!(old.is_some());
        assert_eq!(inv.len(), 1);
        assert_eq!(inv.get("a.gpkg").unwrap().size, 3);
    }

    #[test]
    fn inventory_total_size_and_order() {
        let inv: FileInventory = vec![
            FileRecord::from_bytes("z.qgs", b"12345"),
            FileRecord::from_bytes("a.gpkg", b"1"),
        ]
        .into_iter()
        .collect();

        assert_eq!(inv.total_size(), 6);
        let paths: Vec<_> = inv.paths().cloned().collect();
        assert_eq!(paths, vec!["a.gpkg".to_string(), "z.qgs".to_string()]);
    }

    #[test]
    fn record_same_content_ignores_mtime() {
        let a = FileRecord::from_bytes("p", b"data");
        let b = FileRecord::from_bytes("p", b"data").with_mtime(Utc::now());
        assert!(a.same_content(&b));
    }

    #[test]
    fn record_serde_omits_missing_mtime() {
        let rec = FileRecord::from_bytes("photos/1.jpg", b"jpg");
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("mtime").is_none());
        assert_eq!(json["size"], 3);
    }
}
