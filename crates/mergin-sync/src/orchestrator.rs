//! Transfer orchestrator
//!
//! Runs one download, update or upload against the transport, reporting
//! byte progress through the pending table and the event bus.
//!
//! Downloads stream every file into `.mergin/tmp` and move it into place
//! once complete, so an interrupted file never replaces a good one. Files
//! already moved stay on disk when a later file fails or the transfer is
//! cancelled; the metadata is only advanced after everything succeeded.
//!
//! Uploads check the push precondition before anything is sent: a server
//! that moved past the local base version fails the upload with zero
//! files pushed.

use crate::error::SyncError;
use crate::local::LocalProjectsManager;
use crate::pending::{PendingTransfers, TransferKind};
use chrono::Utc;
use futures::StreamExt;
use mergin_api::{
    ApiError, EventBus, ProjectId, ProjectInfo, PushChanges, PushFile, PushRequest,
    RequestContext, RequestId, SyncEvent, Transport,
};
use mergin_files::{
    resolve_in_project, Checksum, FileInventory, FileRecord, ProjectMetadata, Scanner,
    METADATA_DIR,
};
use mergin_reconcile::{check_push, Direction, FileDiff};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One transfer to run
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub project: ProjectId,
    pub kind: TransferKind,
    pub project_dir: PathBuf,
    pub request_id: RequestId,
    pub token: CancellationToken,
}

/// Runs transfers and reports their outcome
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    bus: EventBus,
    pending: Arc<PendingTransfers>,
    local: Arc<LocalProjectsManager>,
    scanner: Scanner,
    chunk_size: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("chunk_size", &self.chunk_size)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create orchestrator
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        bus: EventBus,
        pending: Arc<PendingTransfers>,
        local: Arc<LocalProjectsManager>,
        scanner: Scanner,
        chunk_size: usize,
    ) -> Self {
        Self {
            transport,
            bus,
            pending,
            local,
            scanner,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Run a transfer to completion, returning the new project metadata
    ///
    /// # Errors
    /// Transport, filesystem, conflict or cancellation failures
    pub async fn run(&self, ctx: &RequestContext, job: &TransferJob) -> Result<ProjectMetadata, SyncError> {
        tracing::info!("{} {:?} started ({})", job.project, job.kind, job.request_id);
        match job.kind.direction() {
            Direction::Download => self.download(ctx, job).await,
            Direction::Upload => self.upload(ctx, job).await,
        }
    }

    /// Clear the pending entry and publish the outcome
    ///
    /// Returns `false` for late completions of cancelled transfers, which
    /// are dropped without any event.
    pub fn complete(&self, job: &TransferJob, result: &Result<ProjectMetadata, SyncError>) -> bool {
        let success = result.is_ok();
        if self.pending.finish(&job.project, job.request_id, success).is_none() {
            tracing::debug!("ignoring late completion of {} ({})", job.project, job.request_id);
            return false;
        }

        match result {
            Ok(metadata) => {
                tracing::info!(
                    "{} {:?} finished at {}",
                    job.project,
                    job.kind,
                    metadata.version.as_deref().unwrap_or("-")
                );
                self.local.add_or_refresh(&job.project_dir);
            }
            Err(e) => {
                tracing::warn!("{} {:?} failed: {}", job.project, job.kind, e);
                if job.project_dir.exists() {
                    self.local.add_or_refresh(&job.project_dir);
                }
                e.report(&self.bus);
            }
        }

        self.bus.publish(SyncEvent::SyncProjectFinished {
            request_id: job.request_id,
            project_dir: job.project_dir.clone(),
            project: job.project.clone(),
            success,
        });
        true
    }

    async fn download(&self, ctx: &RequestContext, job: &TransferJob) -> Result<ProjectMetadata, SyncError> {
        let info = cancellable(&job.token, self.transport.project_info(ctx, &job.project)).await?;
        let dir = &job.project_dir;

        let previous = ProjectMetadata::load(dir)?;
        let base = previous
            .as_ref()
            .map(ProjectMetadata::synced_files)
            .unwrap_or_default();
        let local = self.scan(dir).await?;
        let server: FileInventory = info.files.iter().cloned().collect();
        let diff = FileDiff::compute(&local, &server, &base, Direction::Download);

        tracing::debug!(
            "{}: fetching {} new, {} changed, {} obsolete ({} bytes)",
            job.project,
            diff.added.len(),
            diff.updated.len(),
            diff.obsolete.len(),
            diff.transfer_size()
        );
        self.pending
            .set_total(&job.project, job.request_id, diff.transfer_size());
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SyncError::io(dir, e))?;

        let full_name = job.project.to_string();
        let mut completed = 0;
        for record in diff.transfers() {
            self.fetch_file(ctx, job, &info, record)
                .await
                .map_err(|e| e.after_files(&full_name, completed))?;
            completed += 1;
        }

        self.finish_download(job, previous, &info, &diff.obsolete, completed)
            .await
    }

    /// Delete obsolete files and record the sync
    ///
    /// The token is checked before every deletion and before the metadata
    /// is written, so a cancelled download never reads as up to date.
    async fn finish_download(
        &self,
        job: &TransferJob,
        previous: Option<ProjectMetadata>,
        info: &ProjectInfo,
        obsolete: &[String],
        completed: usize,
    ) -> Result<ProjectMetadata, SyncError> {
        let dir = &job.project_dir;
        let full_name = job.project.to_string();
        for path in obsolete {
            if job.token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let Some(target) = resolve_in_project(dir, path) else {
                continue;
            };
            match tokio::fs::remove_file(&target).await {
                Ok(()) => tracing::debug!("{}: removed obsolete {}", job.project, path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::io(target, e).after_files(&full_name, completed)),
            }
        }

        if job.token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let metadata = record_sync(previous, info, dir)?;
        self.bus.publish(SyncEvent::ReloadProject {
            project_dir: dir.clone(),
        });
        self.bus.publish(SyncEvent::Notify {
            message: format!("Project {full_name} is up to date"),
        });
        Ok(metadata)
    }

    async fn fetch_file(
        &self,
        ctx: &RequestContext,
        job: &TransferJob,
        info: &ProjectInfo,
        record: &FileRecord,
    ) -> Result<(), SyncError> {
        let dir = &job.project_dir;
        let target = resolve_in_project(dir, &record.path)
            .ok_or_else(|| SyncError::UnsafePath(record.path.clone()))?;
        let tmp_dir = dir.join(METADATA_DIR).join("tmp");
        tokio::fs::create_dir_all(&tmp_dir)
            .await
            .map_err(|e| SyncError::io(&tmp_dir, e))?;
        let tmp = tmp_dir.join(Uuid::new_v4().to_string());

        if let Err(e) = self.stream_to(ctx, job, info, record, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| SyncError::io(&target, e))
    }

    async fn stream_to(
        &self,
        ctx: &RequestContext,
        job: &TransferJob,
        info: &ProjectInfo,
        record: &FileRecord,
        tmp: &Path,
    ) -> Result<(), SyncError> {
        let mut stream = cancellable(
            &job.token,
            self.transport
                .download_file(ctx, &job.project, &record.path, info.version.as_deref()),
        )
        .await?;
        let mut file = tokio::fs::File::create(tmp)
            .await
            .map_err(|e| SyncError::io(tmp, e))?;

        loop {
            let next = tokio::select! {
                biased;
                () = job.token.cancelled() => return Err(SyncError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::io(tmp, e))?;
            self.report_progress(job, chunk.len() as u64);
        }
        file.flush().await.map_err(|e| SyncError::io(tmp, e))?;
        drop(file);

        let written = Checksum::of_file(tmp)?;
        if written != record.checksum {
            return Err(ApiError::Decode(format!(
                "checksum mismatch for {}: expected {}, got {}",
                record.path,
                record.checksum.short(),
                written.short()
            ))
            .into());
        }
        Ok(())
    }

    async fn upload(&self, ctx: &RequestContext, job: &TransferJob) -> Result<ProjectMetadata, SyncError> {
        let info = cancellable(&job.token, self.transport.project_info(ctx, &job.project)).await?;
        let dir = &job.project_dir;
        let full_name = job.project.to_string();

        let previous = ProjectMetadata::load(dir)?;
        let base = previous
            .as_ref()
            .map(ProjectMetadata::synced_files)
            .unwrap_or_default();
        let local = self.scan(dir).await?;
        let server: FileInventory = info.files.iter().cloned().collect();

        // Update-first: nothing is sent while the server is ahead
        let server_changes = FileDiff::compute(&local, &server, &base, Direction::Download);
        check_push(
            &full_name,
            previous.as_ref().and_then(|m| m.updated),
            info.updated,
            &server_changes,
        )?;

        let diff = FileDiff::compute(&local, &server, &server, Direction::Upload);
        if diff.is_empty() {
            tracing::info!("{}: nothing to upload", job.project);
            return record_sync(previous, &info, dir);
        }

        let changes = self.push_changes(&diff);
        self.pending
            .set_total(&job.project, job.request_id, diff.transfer_size());
        let request = PushRequest {
            version: previous.as_ref().and_then(|m| m.version.clone()),
            changes,
        };

        let transaction = cancellable(
            &job.token,
            self.transport.push_start(ctx, &job.project, &request),
        )
        .await?
        .transaction;

        if !self
            .pending
            .set_transaction(&job.project, job.request_id, &transaction)
        {
            // Cancelled while the transaction was being opened
            let _ = self.transport.push_cancel(ctx, &transaction).await;
            return Err(SyncError::Cancelled);
        }

        let pushed = match self.push_files(ctx, job, &transaction, &request.changes).await {
            Ok(()) => {
                cancellable(&job.token, self.transport.push_finish(ctx, &transaction)).await
            }
            Err(e) => Err(e),
        };
        let new_info = match pushed {
            Ok(info) => info,
            Err(e) => {
                if !e.is_cancelled() {
                    if let Err(cancel_err) = self.transport.push_cancel(ctx, &transaction).await {
                        tracing::warn!("{}: push cancel failed: {}", job.project, cancel_err);
                    }
                }
                return Err(e);
            }
        };

        let metadata = record_sync(previous, &new_info, dir)?;
        self.bus.publish(SyncEvent::Notify {
            message: format!("Project {full_name} uploaded"),
        });
        Ok(metadata)
    }

    fn push_changes(&self, diff: &FileDiff) -> PushChanges {
        let chunk_size = self.chunk_size as u64;
        let announce = |record: &FileRecord| PushFile {
            record: record.clone(),
            chunks: (0..record.size.div_ceil(chunk_size))
                .map(|_| Uuid::new_v4())
                .collect(),
        };
        PushChanges {
            added: diff.added.iter().map(announce).collect(),
            updated: diff.updated.iter().map(announce).collect(),
            removed: diff.removed.clone(),
        }
    }

    async fn push_files(
        &self,
        ctx: &RequestContext,
        job: &TransferJob,
        transaction: &str,
        changes: &PushChanges,
    ) -> Result<(), SyncError> {
        for file in changes.uploads() {
            let path = resolve_in_project(&job.project_dir, &file.record.path)
                .ok_or_else(|| SyncError::UnsafePath(file.record.path.clone()))?;
            let mut reader = tokio::fs::File::open(&path)
                .await
                .map_err(|e| SyncError::io(&path, e))?;

            for chunk_id in &file.chunks {
                let data = read_chunk(&mut reader, self.chunk_size)
                    .await
                    .map_err(|e| SyncError::io(&path, e))?;
                let len = data.len() as u64;
                cancellable(
                    &job.token,
                    self.transport.push_chunk(ctx, transaction, *chunk_id, data),
                )
                .await?;
                self.report_progress(job, len);
            }
        }
        Ok(())
    }

    fn report_progress(&self, job: &TransferJob, bytes: u64) {
        if let Some(progress) = self.pending.advance(&job.project, job.request_id, bytes) {
            self.bus.publish(SyncEvent::SyncProjectStatusChanged {
                project: job.project.clone(),
                progress,
            });
        }
    }

    async fn scan(&self, dir: &Path) -> Result<FileInventory, SyncError> {
        let scanner = self.scanner.clone();
        let root = dir.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.inventory(&root))
            .await
            .map_err(|e| SyncError::io(dir, std::io::Error::other(e)))
    }
}

/// Await a transport call unless the token fires first
async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(SyncError::Cancelled),
        result = fut => result.map_err(SyncError::from),
    }
}

async fn read_chunk(reader: &mut tokio::fs::File, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Advance the metadata to a server state after a successful sync
fn record_sync(
    previous: Option<ProjectMetadata>,
    info: &ProjectInfo,
    dir: &Path,
) -> Result<ProjectMetadata, SyncError> {
    let mut metadata =
        previous.unwrap_or_else(|| ProjectMetadata::new(&info.namespace, &info.name));
    metadata.namespace.clone_from(&info.namespace);
    metadata.name.clone_from(&info.name);
    metadata.version.clone_from(&info.version);
    metadata.updated = info.updated;
    metadata.files.clone_from(&info.files);
    metadata.last_sync = Some(Utc::now());
    metadata.save(dir)?;
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable(&token, async { Ok::<_, ApiError>(1) }).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn read_chunk_splits_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let mut reader = tokio::fs::File::open(&path).await.unwrap();

        assert_eq!(read_chunk(&mut reader, 4).await.unwrap(), b"0123");
        assert_eq!(read_chunk(&mut reader, 4).await.unwrap(), b"4567");
        assert_eq!(read_chunk(&mut reader, 4).await.unwrap(), b"89");
        assert!(read_chunk(&mut reader, 4).await.unwrap().is_empty());
    }

    fn info() -> ProjectInfo {
        ProjectInfo {
            namespace: "lutra".into(),
            name: "trees".into(),
            version: Some("v3".into()),
            created: None,
            updated: Some(Utc::now()),
            files: vec![FileRecord::from_bytes("a.gpkg", b"a")],
        }
    }

    fn orchestrator(data_dir: &Path) -> Orchestrator {
        let bus = EventBus::default();
        Orchestrator::new(
            Arc::new(mergin_test_utils::FakeServer::new()),
            bus.clone(),
            Arc::new(PendingTransfers::new()),
            Arc::new(LocalProjectsManager::new(data_dir, bus)),
            Scanner::default(),
            4,
        )
    }

    fn update_job(project_dir: &Path) -> TransferJob {
        TransferJob {
            project: ProjectId::new("lutra", "trees"),
            kind: TransferKind::Update,
            project_dir: project_dir.to_path_buf(),
            request_id: RequestId(1),
            token: CancellationToken::new(),
        }
    }

    #[test]
    fn record_sync_advances_metadata() {
        let dir = tempfile::tempdir().unwrap();

        let metadata = record_sync(None, &info(), dir.path()).unwrap();

        assert_eq!(metadata.version.as_deref(), Some("v3"));
        assert!(metadata.last_sync.is_some());
        assert_eq!(ProjectMetadata::load(dir.path()).unwrap(), Some(metadata));
    }

    #[tokio::test]
    async fn finish_download_removes_obsolete_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("trees");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("old.txt"), b"old").unwrap();
        let job = update_job(&project_dir);

        let metadata = orchestrator(dir.path())
            .finish_download(&job, None, &info(), &["old.txt".to_string()], 1)
            .await
            .unwrap();

        assert!(!project_dir.join("old.txt").exists());
        assert_eq!(ProjectMetadata::load(&project_dir).unwrap(), Some(metadata));
    }

    #[tokio::test]
    async fn cancelled_download_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("trees");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("old.txt"), b"old").unwrap();
        let job = update_job(&project_dir);
        job.token.cancel();

        let result = orchestrator(dir.path())
            .finish_download(&job, None, &info(), &["old.txt".to_string()], 1)
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(project_dir.join("old.txt").exists());
        assert_eq!(ProjectMetadata::load(&project_dir).unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_without_obsolete_files_skips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("trees");
        std::fs::create_dir_all(&project_dir).unwrap();
        let job = update_job(&project_dir);
        job.token.cancel();

        let result = orchestrator(dir.path())
            .finish_download(&job, None, &info(), &[], 2)
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(ProjectMetadata::load(&project_dir).unwrap(), None);
    }
}
