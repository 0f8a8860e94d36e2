use mergin_files::{Checksum, ProjectMetadata, Scanner};
use std::fs;
use std::path::Path;

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

#[test]
fn list_files_skips_ignored_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "project.qgs", b"<qgis/>");
    write(dir.path(), "project.qgs~", b"backup");
    write(dir.path(), "data/survey.gpkg", b"gpkg");
    write(dir.path(), "data/survey.gpkg-wal", b"wal");
    write(dir.path(), "data/survey.gpkg-shm", b"shm");
    ProjectMetadata::new("ns", "proj").save(dir.path()).unwrap();

    let files: Vec<String> = Scanner::default()
        .list_files(dir.path())
        .into_iter()
        .collect();

    assert_eq!(files, vec!["data/survey.gpkg", "project.qgs"]);
}

#[test]
fn list_files_of_missing_root_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone");
    assert!(Scanner::default().list_files(&missing).is_empty());
    assert!(Scanner::default().last_modified(&missing).is_none());
}

#[test]
fn inventory_records_checksums_and_sizes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "photos/a.jpg", b"jpeg bytes");

    let inventory = Scanner::default().inventory(dir.path());
    let record = inventory.get("photos/a.jpg").unwrap();

    assert_eq!(record.size, 10);
    assert_eq!(record.checksum, Checksum::compute(b"jpeg bytes"));
    assert!(record.mtime.is_some());
}

#[test]
fn last_modified_ignores_journal_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "survey.gpkg", b"gpkg");
    let before = Scanner::default().last_modified(dir.path()).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    write(dir.path(), "survey.gpkg-wal", b"journal");

    let after = Scanner::default().last_modified(dir.path()).unwrap();
    assert_eq!(before, after);
}
