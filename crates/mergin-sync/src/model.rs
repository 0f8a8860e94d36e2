//! Projects view model
//!
//! A [`ProjectsModel`] keeps one unified list of [`ProjectEntry`]s for a
//! view: the local projects, or one of the server listings. It is driven by
//! the session's events and tells the caller what changed.
//!
//! Listing responses only count when they answer the model's last request;
//! a late answer to an older request is dropped.

use crate::error::SyncError;
use crate::pending::TransferStatus;
use crate::project::{LocalProject, ProjectEntry, RemoteProject};
use crate::session::SyncSession;
use mergin_api::{ListFlag, ProjectId, ProjectSummary, RequestId, SyncEvent};
use mergin_files::Scanner;
use mergin_reconcile::{Direction, ProjectStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Which projects a model shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Projects in the data dir
    Local,
    /// Projects created by the user
    My,
    /// Projects shared with the user
    Shared,
    /// All public projects
    Explore,
    /// Reserved; never lists anything
    Recent,
}

impl ModelKind {
    /// Listing flag of a server view
    #[must_use]
    pub fn flag(self) -> Option<ListFlag> {
        match self {
            Self::My => Some(ListFlag::Created),
            Self::Shared => Some(ListFlag::Shared),
            Self::Local | Self::Explore | Self::Recent => None,
        }
    }

    /// Whether the view is driven by a server listing
    #[inline]
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::My | Self::Shared | Self::Explore)
    }
}

/// What a handled event changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChange {
    /// Membership or order changed
    Reset,
    /// Only this row changed
    RowChanged(usize),
}

/// Unified projects list of one view
#[derive(Debug)]
pub struct ProjectsModel {
    kind: ModelKind,
    session: SyncSession,
    remote: Vec<ProjectSummary>,
    entries: Vec<ProjectEntry>,
    last_request: Option<RequestId>,
    server_count: u64,
}

impl ProjectsModel {
    /// Create a model; the local view starts from the cached listing
    #[must_use]
    pub fn new(kind: ModelKind, session: SyncSession) -> Self {
        let mut model = Self {
            kind,
            session,
            remote: Vec::new(),
            entries: Vec::new(),
            last_request: None,
            server_count: 0,
        };
        if kind == ModelKind::Local {
            let cached = model.session.projects();
            model.merge_projects(cached);
        }
        model
    }

    /// View kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Current rows
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[ProjectEntry] {
        &self.entries
    }

    /// Number of rows
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no rows
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the listing request the model waits for
    #[inline]
    #[must_use]
    pub fn last_request_id(&self) -> Option<RequestId> {
        self.last_request
    }

    /// Total matches reported by the server for the last listing
    #[inline]
    #[must_use]
    pub fn server_count(&self) -> u64 {
        self.server_count
    }

    /// Request a new listing; the answer arrives as an event
    ///
    /// The local view asks for the server state of its projects, server
    /// views for one page of their listing. `Recent` never lists.
    pub fn list_projects(&mut self, search: &str, page: u32) -> Option<RequestId> {
        let id = match self.kind {
            ModelKind::Local => self.session.list_projects_by_name(),
            ModelKind::My | ModelKind::Shared | ModelKind::Explore => {
                let query = self.session.list_query(self.kind.flag(), search, page);
                self.session.list_projects(query)
            }
            ModelKind::Recent => return None,
        };
        self.last_request = Some(id);
        Some(id)
    }

    /// Apply an event, reporting what changed
    pub fn handle_event(&mut self, event: &SyncEvent) -> Option<ModelChange> {
        if self.kind == ModelKind::Recent {
            return None;
        }
        match event {
            SyncEvent::ListProjectsFinished {
                request_id,
                projects,
                count,
                ..
            } => {
                if self.last_request != Some(*request_id) {
                    tracing::debug!("{:?} model ignoring stale listing {}", self.kind, request_id);
                    return None;
                }
                self.server_count = *count;
                self.merge_projects(projects.clone());
                Some(ModelChange::Reset)
            }
            SyncEvent::SyncProjectStatusChanged { project, progress } if *progress >= 0.0 => {
                let row = self.row_of(project)?;
                let remote = self.entries[row].remote.as_mut()?;
                remote.apply_progress(*progress);
                Some(ModelChange::RowChanged(row))
            }
            SyncEvent::SyncProjectStatusChanged { .. } => self.rebuild(),
            SyncEvent::SyncProjectFinished {
                project_dir,
                success,
                ..
            } => {
                if *success {
                    self.advance_summary(project_dir);
                }
                self.rebuild()
            }
            SyncEvent::LocalProjectAdded { .. }
            | SyncEvent::LocalProjectRemoved { .. }
            | SyncEvent::LocalProjectDataChanged { .. } => self.rebuild(),
            _ => None,
        }
    }

    /// Rebuild the rows from a server listing
    pub fn merge_projects(&mut self, remote: Vec<ProjectSummary>) {
        self.remote = remote;
        self.entries = self.merged();
    }

    /// First row matching `id`, local id checked before server id
    #[must_use]
    pub fn project_from_id(&self, id: &str) -> Option<&ProjectEntry> {
        self.entries.iter().find(|e| e.matches(id))
    }

    /// Whether any row matches `id`
    #[must_use]
    pub fn contains_project(&self, id: &str) -> bool {
        self.project_from_id(id).is_some()
    }

    /// Start the transfer a row needs
    ///
    /// Unknown, local-only, pending and up-to-date rows are left alone and
    /// yield `Ok(None)`.
    ///
    /// # Errors
    /// The transfer could not be started
    pub fn sync_project(&self, id: &str) -> Result<Option<RequestId>, SyncError> {
        let Some(remote) = self.project_from_id(id).and_then(|e| e.remote.as_ref()) else {
            return Ok(None);
        };
        if remote.pending {
            return Ok(None);
        }
        let request = match remote.status {
            ProjectStatus::NoVersion => self.session.download_project(&remote.id)?,
            ProjectStatus::OutOfDate => self.session.update_project(&remote.id)?,
            ProjectStatus::Modified => self.session.upload_project(&remote.id)?,
            ProjectStatus::UpToDate => return Ok(None),
        };
        Ok(Some(request))
    }

    /// Cancel the transfer of a row, whichever direction it runs
    pub fn stop_project_sync(&self, id: &str) -> bool {
        let Some(remote) = self.project_from_id(id).and_then(|e| e.remote.as_ref()) else {
            return false;
        };
        match self.session.pending().get(&remote.id).map(|t| t.kind.direction()) {
            Some(Direction::Download) => self.session.update_cancel(&remote.id),
            Some(Direction::Upload) => self.session.upload_cancel(&remote.id),
            None => false,
        }
    }

    /// Full names of local projects that were synced from the server
    #[must_use]
    pub fn project_names(&self) -> Vec<String> {
        self.session.local_projects().project_names()
    }

    fn row_of(&self, project: &ProjectId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.remote.as_ref().is_some_and(|r| &r.id == project))
    }

    fn merged(&self) -> Vec<ProjectEntry> {
        merge_entries(
            self.kind,
            &self.session.local_projects().projects(),
            &self.remote,
            &self.session.pending_transfers(),
            self.session.scanner(),
        )
    }

    fn rebuild(&mut self) -> Option<ModelChange> {
        let merged = self.merged();
        let old = std::mem::replace(&mut self.entries, merged);
        change_between(&old, &self.entries)
    }

    /// After a sync the listed server timestamp may be older than the copy
    fn advance_summary(&mut self, project_dir: &Path) {
        let Some(local) = self.session.local_projects().project_by_path(project_dir) else {
            return;
        };
        let Some(id) = local.id() else {
            return;
        };
        if let Some(summary) = self.remote.iter_mut().find(|s| s.id() == id) {
            if local.local_updated() > summary.updated {
                summary.updated = local.local_updated();
                summary.version = local.version().map(str::to_string);
            }
        }
    }
}

/// Pair local projects with listed server projects
///
/// The local view keeps every local project, attaching the server project
/// with the same identity to the first copy only. Server views keep every
/// listed project once, attaching its local copy when there is one.
#[must_use]
pub fn merge_entries(
    kind: ModelKind,
    locals: &[LocalProject],
    remote: &[ProjectSummary],
    pending: &[(ProjectId, TransferStatus)],
    scanner: &Scanner,
) -> Vec<ProjectEntry> {
    let transfer = |id: &ProjectId| pending.iter().find(|(p, _)| p == id).map(|(_, s)| *s);
    let mut seen: HashSet<ProjectId> = HashSet::new();

    match kind {
        ModelKind::Local => locals
            .iter()
            .map(|local| {
                let summary = local
                    .id()
                    .filter(|id| !seen.contains(id))
                    .and_then(|id| remote.iter().find(|s| s.id() == id));
                let remote = summary.map(|s| {
                    seen.insert(s.id());
                    RemoteProject::from_summary(s, Some(local), transfer(&s.id()), scanner)
                });
                ProjectEntry {
                    local: Some(local.clone()),
                    remote,
                }
            })
            .collect(),
        ModelKind::My | ModelKind::Shared | ModelKind::Explore => remote
            .iter()
            .filter(|s| seen.insert(s.id()))
            .map(|summary| {
                let id = summary.id();
                let local = locals.iter().find(|l| l.id().as_ref() == Some(&id));
                ProjectEntry {
                    local: local.cloned(),
                    remote: Some(RemoteProject::from_summary(
                        summary,
                        local,
                        transfer(&id),
                        scanner,
                    )),
                }
            })
            .collect(),
        ModelKind::Recent => Vec::new(),
    }
}

fn change_between(old: &[ProjectEntry], new: &[ProjectEntry]) -> Option<ModelChange> {
    if old.len() != new.len() || old.iter().zip(new).any(|(a, b)| a.id() != b.id()) {
        return Some(ModelChange::Reset);
    }
    let mut changed = old.iter().zip(new).enumerate().filter(|(_, (a, b))| a != b);
    match (changed.next(), changed.next()) {
        (None, _) => None,
        (Some((row, _)), None) => Some(ModelChange::RowChanged(row)),
        (Some(_), Some(_)) => Some(ModelChange::Reset),
    }
}
