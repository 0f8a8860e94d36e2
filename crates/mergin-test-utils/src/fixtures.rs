//! Project directory fixtures

use mergin_api::SyncConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a file below `root`, creating parent directories
pub fn write_file(root: &Path, rel: &str, data: &[u8]) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}

/// Create a project directory under `data_dir` holding `files`
pub fn project_dir_with(data_dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let dir = data_dir.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for (rel, data) in files {
        write_file(&dir, rel, data);
    }
    dir
}

/// Read a project file as UTF-8
pub fn read_file(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

/// Temporary data directory plus a config pointing at it
pub fn test_config() -> (TempDir, SyncConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig::default()
        .with_api_root("http://fake.invalid/")
        .with_data_dir(dir.path())
        .with_chunk_size(8);
    (dir, config)
}
