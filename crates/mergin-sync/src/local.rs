//! Local projects manager
//!
//! Tracks the project directories directly under the data dir.

use crate::project::LocalProject;
use mergin_api::{EventBus, ProjectId, SyncEvent};
use mergin_files::{ProjectMetadata, METADATA_DIR};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory-backed list of local projects
#[derive(Debug)]
pub struct LocalProjectsManager {
    data_dir: PathBuf,
    bus: EventBus,
    projects: RwLock<BTreeMap<PathBuf, LocalProject>>,
}

impl LocalProjectsManager {
    /// Create manager and discover existing projects
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, bus: EventBus) -> Self {
        let manager = Self {
            data_dir: data_dir.into(),
            bus,
            projects: RwLock::new(BTreeMap::new()),
        };
        *manager.projects.write() = manager.discover();
        tracing::debug!(
            "found {} local projects in {}",
            manager.projects.read().len(),
            manager.data_dir.display()
        );
        manager
    }

    /// Data directory
    #[inline]
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// All local projects, ordered by directory
    #[must_use]
    pub fn projects(&self) -> Vec<LocalProject> {
        self.projects.read().values().cloned().collect()
    }

    /// Project synced from `id`
    #[must_use]
    pub fn project_by_id(&self, id: &ProjectId) -> Option<LocalProject> {
        self.projects
            .read()
            .values()
            .find(|p| p.id().as_ref() == Some(id))
            .cloned()
    }

    /// Project at a directory
    #[must_use]
    pub fn project_by_path(&self, path: &Path) -> Option<LocalProject> {
        self.projects.read().get(path).cloned()
    }

    /// Full names of projects with a server identity
    #[must_use]
    pub fn project_names(&self) -> Vec<String> {
        self.projects
            .read()
            .values()
            .filter_map(LocalProject::id)
            .map(|id| id.to_string())
            .collect()
    }

    /// Directory a project is (or would be) stored in
    ///
    /// A known project keeps its directory. Otherwise `<name>` is used when
    /// it is free or already holds this project's metadata; taken names get
    /// a `-1`, `-2`, ... suffix. Directories for which `in_use` returns
    /// `true` are skipped as well.
    #[must_use]
    pub fn dir_for(&self, id: &ProjectId, in_use: impl Fn(&Path) -> bool) -> PathBuf {
        if let Some(project) = self.project_by_id(id) {
            return project.path;
        }
        let mut suffix = 0u32;
        loop {
            let candidate = if suffix == 0 {
                self.data_dir.join(&id.name)
            } else {
                self.data_dir.join(format!("{}-{suffix}", id.name))
            };
            if !in_use(&candidate) && Self::can_hold(&candidate, id) {
                return candidate;
            }
            tracing::debug!("{} is taken, not downloading {} there", candidate.display(), id);
            suffix += 1;
        }
    }

    /// Free path, or a directory already synced from `id`
    fn can_hold(dir: &Path, id: &ProjectId) -> bool {
        if !dir.exists() {
            return true;
        }
        if !dir.is_dir() {
            return false;
        }
        matches!(
            ProjectMetadata::load(dir),
            Ok(Some(metadata)) if metadata.namespace == id.namespace && metadata.name == id.name
        )
    }

    /// Re-read a project directory after it changed
    ///
    /// Publishes `LocalProjectAdded` for new projects and
    /// `LocalProjectDataChanged` for known ones.
    pub fn add_or_refresh(&self, path: &Path) -> LocalProject {
        let project = LocalProject::open(path);
        let known = self
            .projects
            .write()
            .insert(path.to_path_buf(), project.clone())
            .is_some();
        let project_dir = path.to_path_buf();
        if known {
            self.bus.publish(SyncEvent::LocalProjectDataChanged { project_dir });
        } else {
            tracing::info!("local project added: {}", path.display());
            self.bus.publish(SyncEvent::LocalProjectAdded { project_dir });
        }
        project
    }

    /// Forget a project; with `delete_files` its directory is removed too
    ///
    /// # Errors
    /// Removing the directory failed
    pub fn remove(&self, path: &Path, delete_files: bool) -> std::io::Result<bool> {
        if delete_files && path.starts_with(&self.data_dir) && path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        let removed = self.projects.write().remove(path).is_some();
        if removed {
            tracing::info!("local project removed: {}", path.display());
            self.bus.publish(SyncEvent::LocalProjectRemoved {
                project_dir: path.to_path_buf(),
            });
        }
        Ok(removed)
    }

    /// Rescan the data dir, publishing events for every difference
    pub fn refresh(&self) {
        let found = self.discover();
        let known: Vec<PathBuf> = self.projects.read().keys().cloned().collect();

        for path in known.iter().filter(|p| !found.contains_key(*p)) {
            // Already gone from disk
            let _ = self.remove(path, false);
        }
        for (path, project) in found {
            let changed = self.projects.read().get(&path) != Some(&project);
            if changed {
                self.add_or_refresh(&path);
            }
        }
    }

    fn discover(&self) -> BTreeMap<PathBuf, LocalProject> {
        let Ok(entries) = std::fs::read_dir(&self.data_dir) else {
            return BTreeMap::new();
        };
        entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|e| e.file_name() != METADATA_DIR)
            .map(|e| {
                let path = e.path();
                (path.clone(), LocalProject::open(&path))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_first_level_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("trees/photos")).unwrap();
        std::fs::create_dir_all(dir.path().join(".mergin")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();
        ProjectMetadata::new("lutra", "trees")
            .save(&dir.path().join("trees"))
            .unwrap();

        let manager = LocalProjectsManager::new(dir.path(), EventBus::default());

        assert_eq!(manager.projects().len(), 1);
        assert_eq!(manager.project_names(), vec!["lutra/trees".to_string()]);
        let id = ProjectId::new("lutra", "trees");
        assert_eq!(manager.dir_for(&id, |_| false), dir.path().join("trees"));
        assert_eq!(
            manager.dir_for(&ProjectId::new("lutra", "new"), |_| false),
            dir.path().join("new")
        );
    }

    #[test]
    fn dir_for_skips_directories_of_other_projects() {
        let dir = tempfile::tempdir().unwrap();
        ProjectMetadata::new("alice", "trees")
            .save(&dir.path().join("trees"))
            .unwrap();
        std::fs::create_dir_all(dir.path().join("trees-1")).unwrap();
        std::fs::write(dir.path().join("trees-1/notes.txt"), b"never synced").unwrap();
        let manager = LocalProjectsManager::new(dir.path(), EventBus::default());

        let bob = ProjectId::new("bob", "trees");
        assert_eq!(manager.dir_for(&bob, |_| false), dir.path().join("trees-2"));
        let reserved = dir.path().join("trees-2");
        assert_eq!(
            manager.dir_for(&bob, |p| p == reserved.as_path()),
            dir.path().join("trees-3")
        );
        assert_eq!(
            manager.dir_for(&ProjectId::new("alice", "trees"), |_| false),
            dir.path().join("trees")
        );
    }

    #[tokio::test]
    async fn refresh_publishes_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("old")).unwrap();
        let bus = EventBus::default();
        let manager = LocalProjectsManager::new(dir.path(), bus.clone());
        let mut rx = bus.subscribe();

        std::fs::remove_dir_all(dir.path().join("old")).unwrap();
        std::fs::create_dir_all(dir.path().join("new")).unwrap();
        manager.refresh();

        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::LocalProjectRemoved {
                project_dir: dir.path().join("old")
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::LocalProjectAdded {
                project_dir: dir.path().join("new")
            }
        );
    }

    #[test]
    fn remove_deletes_only_inside_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("trees");
        std::fs::create_dir_all(&project).unwrap();
        let manager = LocalProjectsManager::new(dir.path(), EventBus::default());

        assert!(manager.remove(&project, true).unwrap());
        assert!(!project.exists());
        assert!(!manager.remove(&project, true).unwrap());
    }
}
