//! Pending transfer table
//!
//! One entry per project while a transfer is in flight. The entry is the
//! per-project lock: a second start is rejected until it is removed. A
//! project is pending exactly when it has an entry here.

use crate::error::SyncError;
use crate::state::{validate_transition, TransferPhase};
use dashmap::DashMap;
use mergin_api::{ProjectId, QueryKind, RequestId};
use mergin_reconcile::Direction;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// What a transfer does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// First download of a project
    Download,
    /// Pull newer server version into an existing copy
    Update,
    /// Push local changes
    Upload,
}

impl TransferKind {
    /// Authoritative side
    #[must_use]
    pub fn direction(self) -> Direction {
        match self {
            Self::Download | Self::Update => Direction::Download,
            Self::Upload => Direction::Upload,
        }
    }

    /// Request kind used for request ids
    #[must_use]
    pub fn query_kind(self) -> QueryKind {
        match self {
            Self::Download => QueryKind::Download,
            Self::Update => QueryKind::Update,
            Self::Upload => QueryKind::Upload,
        }
    }
}

/// Byte progress of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferStatus {
    pub transferred: u64,
    pub total: u64,
}

impl TransferStatus {
    /// Ratio in `0..=1`; 0 when nothing has to move
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.transferred.min(self.total) as f64) / (self.total as f64)
        }
    }
}

/// A transfer in flight
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub request_id: RequestId,
    pub kind: TransferKind,
    pub project_dir: PathBuf,
    pub status: TransferStatus,
    /// Push transaction, once opened
    pub transaction: Option<String>,
    phase: TransferPhase,
    token: CancellationToken,
}

impl PendingTransfer {
    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Cancellation token of the transfer
    #[inline]
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Concurrent table of in-flight transfers keyed by project
#[derive(Debug, Default)]
pub struct PendingTransfers {
    active: DashMap<ProjectId, PendingTransfer>,
}

impl PendingTransfers {
    /// Create empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer, returning its cancellation token
    ///
    /// # Errors
    /// [`SyncError::AlreadyPending`] when the project already has one
    pub fn begin(
        &self,
        project: &ProjectId,
        kind: TransferKind,
        request_id: RequestId,
        project_dir: &Path,
    ) -> Result<CancellationToken, SyncError> {
        let phase = TransferPhase::Pending(kind.direction());
        match self.active.entry(project.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SyncError::AlreadyPending(project.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                validate_transition(TransferPhase::Idle, phase)?;
                let token = CancellationToken::new();
                slot.insert(PendingTransfer {
                    request_id,
                    kind,
                    project_dir: project_dir.to_path_buf(),
                    status: TransferStatus::default(),
                    transaction: None,
                    phase,
                    token: token.clone(),
                });
                tracing::debug!("{} {:?} started ({})", project, kind, request_id);
                Ok(token)
            }
        }
    }

    /// Set total bytes of the transfer owned by `request_id`
    pub fn set_total(&self, project: &ProjectId, request_id: RequestId, total: u64) -> bool {
        self.with_owned(project, request_id, |t| t.status.total = total)
            .is_some()
    }

    /// Record transferred bytes, returning the new progress ratio
    ///
    /// `None` when the transfer is gone or belongs to another request.
    pub fn advance(&self, project: &ProjectId, request_id: RequestId, bytes: u64) -> Option<f64> {
        self.with_owned(project, request_id, |t| {
            t.status.transferred = t.status.transferred.saturating_add(bytes);
            t.status.progress()
        })
    }

    /// Remember the push transaction of an upload
    pub fn set_transaction(&self, project: &ProjectId, request_id: RequestId, transaction: &str) -> bool {
        self.with_owned(project, request_id, |t| {
            t.transaction = Some(transaction.to_string());
        })
        .is_some()
    }

    /// Remove a finished transfer owned by `request_id`
    ///
    /// Returns `None` for late completions of cancelled transfers.
    pub fn finish(&self, project: &ProjectId, request_id: RequestId, success: bool) -> Option<PendingTransfer> {
        let (_, mut transfer) = self
            .active
            .remove_if(project, |_, t| t.request_id == request_id)?;
        let outcome = if success {
            TransferPhase::Succeeded
        } else {
            TransferPhase::Failed
        };
        if let Err(e) = validate_transition(transfer.phase, outcome) {
            tracing::warn!("{}: {}", project, e);
        }
        transfer.phase = outcome;
        Some(transfer)
    }

    /// Remove a transfer immediately and trigger its cancellation token
    pub fn cancel(&self, project: &ProjectId) -> Option<PendingTransfer> {
        let (_, mut transfer) = self.active.remove(project)?;
        if let Err(e) = validate_transition(transfer.phase, TransferPhase::Idle) {
            tracing::warn!("{}: {}", project, e);
        }
        transfer.phase = TransferPhase::Idle;
        transfer.token.cancel();
        tracing::info!("{} {:?} cancelled", project, transfer.kind);
        Some(transfer)
    }

    /// Cancel every transfer
    pub fn cancel_all(&self) -> Vec<(ProjectId, PendingTransfer)> {
        let projects: Vec<ProjectId> = self.active.iter().map(|e| e.key().clone()).collect();
        projects
            .into_iter()
            .filter_map(|p| self.cancel(&p).map(|t| (p, t)))
            .collect()
    }

    /// Whether the project has a transfer in flight
    #[must_use]
    pub fn is_pending(&self, project: &ProjectId) -> bool {
        self.active.contains_key(project)
    }

    /// Snapshot of one transfer
    #[must_use]
    pub fn get(&self, project: &ProjectId) -> Option<PendingTransfer> {
        self.active.get(project).map(|t| t.clone())
    }

    /// Whether a transfer in flight writes into `dir`
    #[must_use]
    pub fn uses_dir(&self, dir: &Path) -> bool {
        self.active.iter().any(|t| t.project_dir == dir)
    }

    /// Progress of one transfer
    #[must_use]
    pub fn status(&self, project: &ProjectId) -> Option<TransferStatus> {
        self.active.get(project).map(|t| t.status)
    }

    /// Progress of every transfer
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ProjectId, TransferStatus)> {
        let mut all: Vec<_> = self
            .active
            .iter()
            .map(|e| (e.key().clone(), e.value().status))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Number of transfers in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no transfer is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn with_owned<R>(
        &self,
        project: &ProjectId,
        request_id: RequestId,
        f: impl FnOnce(&mut PendingTransfer) -> R,
    ) -> Option<R> {
        let mut entry = self.active.get_mut(project)?;
        if entry.request_id != request_id {
            return None;
        }
        Some(f(entry.value_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ProjectId {
        ProjectId::new("lutra", "trees")
    }

    #[test]
    fn second_begin_is_rejected() {
        let table = PendingTransfers::new();
        table.begin(&id(), TransferKind::Download, RequestId(1), Path::new("/p")).unwrap();

        let err = table
            .begin(&id(), TransferKind::Upload, RequestId(2), Path::new("/p"))
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyPending(_)));
        assert_eq!(table.get(&id()).unwrap().request_id, RequestId(1));
    }

    #[test]
    fn uses_dir_matches_transfer_directory() {
        let table = PendingTransfers::new();
        table.begin(&id(), TransferKind::Download, RequestId(1), Path::new("/data/trees")).unwrap();

        assert!(table.uses_dir(Path::new("/data/trees")));
        assert!(!table.uses_dir(Path::new("/data/trees-1")));
    }

    #[test]
    fn progress_tracks_owner_only() {
        let table = PendingTransfers::new();
        table.begin(&id(), TransferKind::Update, RequestId(5), Path::new("/p")).unwrap();
        assert!(table.set_total(&id(), RequestId(5), 200));

        assert_eq!(table.advance(&id(), RequestId(5), 50), Some(0.25));
        assert_eq!(table.advance(&id(), RequestId(4), 50), None);
        assert_eq!(table.advance(&id(), RequestId(5), 150), Some(1.0));
    }

    #[test]
    fn zero_total_progress_is_zero() {
        assert_eq!(TransferStatus::default().progress(), 0.0);
    }

    #[test]
    fn cancel_then_late_finish_is_ignored() {
        let table = PendingTransfers::new();
        let token = table
            .begin(&id(), TransferKind::Upload, RequestId(1), Path::new("/p"))
            .unwrap();

        let cancelled = table.cancel(&id()).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(cancelled.phase(), TransferPhase::Idle);
        assert!(!table.is_pending(&id()));

        assert!(table.finish(&id(), RequestId(1), true).is_none());
    }

    #[test]
    fn finish_of_restarted_transfer_needs_matching_id() {
        let table = PendingTransfers::new();
        table.begin(&id(), TransferKind::Update, RequestId(1), Path::new("/p")).unwrap();
        table.cancel(&id());
        table.begin(&id(), TransferKind::Update, RequestId(2), Path::new("/p")).unwrap();

        assert!(table.finish(&id(), RequestId(1), false).is_none());
        let done = table.finish(&id(), RequestId(2), true).unwrap();
        assert_eq!(done.phase(), TransferPhase::Succeeded);
        assert!(table.is_empty());
    }
}
