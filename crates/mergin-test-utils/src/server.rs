//! In-memory Mergin server
//!
//! Implements [`Transport`] over a map of projects. Versions advance on
//! every change, push transactions are checked against the announced
//! checksums, and downloads can be held at a gate to exercise
//! cancellation or failed outright to exercise partial transfers.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use mergin_api::{
    ApiError, ByteStream, ListFlag, ListQuery, LoginResponse, PingResponse, ProjectId,
    ProjectInfo, ProjectListResponse, ProjectSummary, PushChanges, PushRequest,
    PushStartResponse, RequestContext, SessionToken, Transport, UserInfo, DEFAULT_LISTING_TAG,
};
use mergin_files::{Checksum, FileRecord};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;
use uuid::Uuid;

/// Server version reported by default
pub const FAKE_SERVER_VERSION: &str = "2020.4.1";

#[derive(Debug, Clone)]
struct FakeProject {
    version: u32,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    tags: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl FakeProject {
    fn version_name(&self) -> String {
        format!("v{}", self.version)
    }

    fn records(&self) -> Vec<FileRecord> {
        self.files
            .iter()
            .map(|(path, data)| FileRecord::from_bytes(path.as_str(), data))
            .collect()
    }

    fn summary(&self, id: &ProjectId) -> ProjectSummary {
        let mut summary = ProjectSummary::new(&id.namespace, &id.name);
        summary.tags = self.tags.clone();
        summary.created = Some(self.created);
        summary.updated = Some(self.updated);
        summary.version = Some(self.version_name());
        summary.size = self.files.values().map(|d| d.len() as u64).sum();
        summary.files_count = self.files.len() as u64;
        summary
    }

    fn info(&self, id: &ProjectId) -> ProjectInfo {
        ProjectInfo {
            namespace: id.namespace.clone(),
            name: id.name.clone(),
            version: Some(self.version_name()),
            created: Some(self.created),
            updated: Some(self.updated),
            files: self.records(),
        }
    }
}

#[derive(Debug)]
struct Transaction {
    project: ProjectId,
    changes: PushChanges,
    chunks: HashMap<Uuid, Vec<u8>>,
}

#[derive(Debug)]
struct ServerState {
    clock: DateTime<Utc>,
    projects: BTreeMap<ProjectId, FakeProject>,
    users: HashMap<String, String>,
    transactions: HashMap<String, Transaction>,
}

impl ServerState {
    /// Logical clock; every change is one minute after the previous one
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::minutes(1);
        self.clock
    }

    fn project_mut(&mut self, id: &ProjectId) -> Result<&mut FakeProject, ApiError> {
        self.projects
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }
}

/// In-memory implementation of the Mergin service
#[derive(Debug)]
pub struct FakeServer {
    state: Mutex<ServerState>,
    version: Mutex<String>,
    offline: AtomicBool,
    download_chunk: usize,
    downloads: AtomicUsize,
    push_starts: AtomicUsize,
    push_chunks: AtomicUsize,
    push_cancels: AtomicUsize,
    gate_after: Mutex<Option<usize>>,
    gate: watch::Sender<bool>,
    fail_downloads_at: Mutex<Option<usize>>,
    fail_chunks_at: Mutex<Option<usize>>,
}

impl FakeServer {
    /// Empty server accepting any login
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        let clock = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap_or_default();
        Self {
            state: Mutex::new(ServerState {
                clock,
                projects: BTreeMap::new(),
                users: HashMap::new(),
                transactions: HashMap::new(),
            }),
            version: Mutex::new(FAKE_SERVER_VERSION.to_string()),
            offline: AtomicBool::new(false),
            download_chunk: 4,
            downloads: AtomicUsize::new(0),
            push_starts: AtomicUsize::new(0),
            push_chunks: AtomicUsize::new(0),
            push_cancels: AtomicUsize::new(0),
            gate_after: Mutex::new(None),
            gate,
            fail_downloads_at: Mutex::new(None),
            fail_chunks_at: Mutex::new(None),
        }
    }

    /// Only accept this user (call repeatedly for more)
    #[must_use]
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.state
            .lock()
            .users
            .insert(username.to_string(), password.to_string());
        self
    }

    /// Report a different API version from `ping`
    pub fn set_version(&self, version: &str) {
        *self.version.lock() = version.to_string();
    }

    /// Fail every call with a network error while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Create an empty project at version `v0`
    pub fn add_project(&self, id: &ProjectId) {
        let mut state = self.state.lock();
        let now = state.tick();
        state.projects.insert(
            id.clone(),
            FakeProject {
                version: 0,
                created: now,
                updated: now,
                tags: vec![DEFAULT_LISTING_TAG.to_string()],
                files: BTreeMap::new(),
            },
        );
    }

    /// Write files as one new server version, creating the project if needed
    pub fn push_files(&self, id: &ProjectId, files: &[(&str, &[u8])]) {
        if !self.state.lock().projects.contains_key(id) {
            self.add_project(id);
        }
        let mut state = self.state.lock();
        let now = state.tick();
        if let Ok(project) = state.project_mut(id) {
            for (path, data) in files {
                project.files.insert((*path).to_string(), data.to_vec());
            }
            project.version += 1;
            project.updated = now;
        }
    }

    /// Delete files as one new server version
    pub fn delete_files(&self, id: &ProjectId, paths: &[&str]) {
        let mut state = self.state.lock();
        let now = state.tick();
        if let Ok(project) = state.project_mut(id) {
            for path in paths {
                project.files.remove(*path);
            }
            project.version += 1;
            project.updated = now;
        }
    }

    /// Current content of a project's files
    #[must_use]
    pub fn files(&self, id: &ProjectId) -> BTreeMap<String, Vec<u8>> {
        self.state
            .lock()
            .projects
            .get(id)
            .map(|p| p.files.clone())
            .unwrap_or_default()
    }

    /// Current version name of a project
    #[must_use]
    pub fn project_version(&self, id: &ProjectId) -> Option<String> {
        self.state.lock().projects.get(id).map(FakeProject::version_name)
    }

    /// Hold every download after the next `served` until [`Self::open_gate`]
    pub fn hold_downloads_after(&self, served: usize) {
        *self.gate_after.lock() = Some(self.download_count() + served);
        self.gate.send_replace(true);
    }

    /// Release held downloads
    pub fn open_gate(&self) {
        *self.gate_after.lock() = None;
        self.gate.send_replace(false);
    }

    /// Fail every download after the next `served` with a server error
    pub fn fail_downloads_after(&self, served: usize) {
        *self.fail_downloads_at.lock() = Some(self.download_count() + served);
    }

    /// Fail every chunk after the next `received` with a server error
    pub fn fail_chunks_after(&self, received: usize) {
        *self.fail_chunks_at.lock() = Some(self.push_chunk_count() + received);
    }

    /// Stop failing downloads and chunks
    pub fn clear_failures(&self) {
        *self.fail_downloads_at.lock() = None;
        *self.fail_chunks_at.lock() = None;
    }

    /// Files served so far
    #[must_use]
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Push transactions opened so far
    #[must_use]
    pub fn push_start_count(&self) -> usize {
        self.push_starts.load(Ordering::SeqCst)
    }

    /// Chunks received so far
    #[must_use]
    pub fn push_chunk_count(&self) -> usize {
        self.push_chunks.load(Ordering::SeqCst)
    }

    /// Push transactions cancelled so far
    #[must_use]
    pub fn push_cancel_count(&self) -> usize {
        self.push_cancels.load(Ordering::SeqCst)
    }

    /// Open push transactions
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.state.lock().transactions.len()
    }

    fn online(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::network("server unreachable", "fake server is offline"));
        }
        Ok(())
    }

    async fn wait_at_gate(&self, served: usize) {
        let limit = *self.gate_after.lock();
        if limit.is_some_and(|limit| served >= limit) {
            let mut rx = self.gate.subscribe();
            // Sender lives as long as self; an error cannot happen here
            let _ = rx.wait_for(|held| !*held).await;
        }
    }
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

fn reached(limit: &Mutex<Option<usize>>, count: usize) -> bool {
    limit.lock().is_some_and(|limit| count >= limit)
}

fn token_user(ctx: &RequestContext) -> Option<&str> {
    ctx.token.as_deref()?.strip_prefix("Bearer fake-")
}

#[async_trait]
impl Transport for FakeServer {
    async fn authenticate(
        &self,
        _ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ApiError> {
        self.online()?;
        let state = self.state.lock();
        if !state.users.is_empty() && state.users.get(username).map(String::as_str) != Some(password)
        {
            return Err(ApiError::Unauthorized("invalid username or password".into()));
        }
        Ok(LoginResponse {
            username: username.to_string(),
            id: 1,
            session: SessionToken {
                token: format!("Bearer fake-{username}"),
                expire: Utc::now() + Duration::hours(1),
            },
            disk_usage: 0,
            storage_limit: 100 * 1024 * 1024,
        })
    }

    async fn user_info(&self, ctx: &RequestContext, username: &str) -> Result<UserInfo, ApiError> {
        self.online()?;
        ctx.require_token()?;
        let state = self.state.lock();
        let disk_usage = state
            .projects
            .iter()
            .filter(|(id, _)| id.namespace == username)
            .flat_map(|(_, p)| p.files.values())
            .map(|d| d.len() as u64)
            .sum();
        Ok(UserInfo {
            username: username.to_string(),
            disk_usage,
            storage_limit: 100 * 1024 * 1024,
        })
    }

    async fn ping(&self, _ctx: &RequestContext) -> Result<PingResponse, ApiError> {
        self.online()?;
        Ok(PingResponse {
            version: self.version.lock().clone(),
        })
    }

    async fn list_projects(
        &self,
        ctx: &RequestContext,
        query: &ListQuery,
    ) -> Result<ProjectListResponse, ApiError> {
        self.online()?;
        let me = token_user(ctx);
        let state = self.state.lock();
        let matching: Vec<ProjectSummary> = state
            .projects
            .iter()
            .filter(|(id, _)| query.search.as_ref().map_or(true, |s| id.name.contains(s.as_str())))
            .filter(|(id, _)| query.user.as_ref().map_or(true, |u| &id.namespace == u))
            .filter(|(_, p)| query.tag.as_ref().map_or(true, |t| p.tags.contains(t)))
            .filter(|(id, _)| match (query.flag, me) {
                (Some(ListFlag::Created), Some(me)) => id.namespace == me,
                (Some(ListFlag::Shared), Some(me)) => id.namespace != me,
                _ => true,
            })
            .map(|(id, p)| p.summary(id))
            .collect();

        let page = query.page.max(1);
        let per_page = query.per_page.max(1) as usize;
        let skip = (page as usize - 1) * per_page;
        Ok(ProjectListResponse {
            count: matching.len() as u64,
            projects: matching.into_iter().skip(skip).take(per_page).collect(),
            page,
        })
    }

    async fn list_projects_by_name(
        &self,
        _ctx: &RequestContext,
        names: &[String],
    ) -> Result<ProjectListResponse, ApiError> {
        self.online()?;
        let state = self.state.lock();
        let projects: Vec<ProjectSummary> = names
            .iter()
            .filter_map(|name| name.parse::<ProjectId>().ok())
            .filter_map(|id| state.projects.get(&id).map(|p| p.summary(&id)))
            .collect();
        Ok(ProjectListResponse {
            count: projects.len() as u64,
            projects,
            page: 1,
        })
    }

    async fn project_info(
        &self,
        _ctx: &RequestContext,
        project: &ProjectId,
    ) -> Result<ProjectInfo, ApiError> {
        self.online()?;
        let state = self.state.lock();
        state
            .projects
            .get(project)
            .map(|p| p.info(project))
            .ok_or_else(|| ApiError::NotFound(project.to_string()))
    }

    async fn download_file(
        &self,
        _ctx: &RequestContext,
        project: &ProjectId,
        path: &str,
        _version: Option<&str>,
    ) -> Result<ByteStream, ApiError> {
        self.online()?;
        let served = self.downloads.fetch_add(1, Ordering::SeqCst);
        if reached(&self.fail_downloads_at, served) {
            return Err(ApiError::Status {
                status: 500,
                body: format!("download of {project}/{path} failed"),
            });
        }
        self.wait_at_gate(served).await;

        let data = {
            let state = self.state.lock();
            let files = &state
                .projects
                .get(project)
                .ok_or_else(|| ApiError::NotFound(project.to_string()))?
                .files;
            files
                .get(path)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("{project}/{path}")))?
        };
        let chunks: Vec<Result<Vec<u8>, ApiError>> = data
            .chunks(self.download_chunk)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn push_start(
        &self,
        ctx: &RequestContext,
        project: &ProjectId,
        request: &PushRequest,
    ) -> Result<PushStartResponse, ApiError> {
        self.online()?;
        ctx.require_token()?;
        let mut state = self.state.lock();
        let current = state.project_mut(project)?.version_name();
        if request.version.as_deref() != Some(current.as_str()) {
            return Err(ApiError::Conflict(format!(
                "project is at {current}, push based on {:?}",
                request.version
            )));
        }
        self.push_starts.fetch_add(1, Ordering::SeqCst);
        let transaction = Uuid::new_v4().to_string();
        state.transactions.insert(
            transaction.clone(),
            Transaction {
                project: project.clone(),
                changes: request.changes.clone(),
                chunks: HashMap::new(),
            },
        );
        Ok(PushStartResponse { transaction })
    }

    async fn push_chunk(
        &self,
        _ctx: &RequestContext,
        transaction: &str,
        chunk: Uuid,
        data: Vec<u8>,
    ) -> Result<(), ApiError> {
        self.online()?;
        if reached(&self.fail_chunks_at, self.push_chunk_count()) {
            return Err(ApiError::Status {
                status: 500,
                body: format!("chunk {chunk} rejected"),
            });
        }
        let mut state = self.state.lock();
        let tx = state
            .transactions
            .get_mut(transaction)
            .ok_or_else(|| ApiError::NotFound(format!("transaction {transaction}")))?;
        tx.chunks.insert(chunk, data);
        self.push_chunks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn push_finish(
        &self,
        _ctx: &RequestContext,
        transaction: &str,
    ) -> Result<ProjectInfo, ApiError> {
        self.online()?;
        let mut state = self.state.lock();
        let tx = state
            .transactions
            .remove(transaction)
            .ok_or_else(|| ApiError::NotFound(format!("transaction {transaction}")))?;

        let mut uploaded = Vec::new();
        for file in tx.changes.uploads() {
            let mut data = Vec::with_capacity(usize::try_from(file.record.size).unwrap_or(0));
            for chunk in &file.chunks {
                let part = tx.chunks.get(chunk).ok_or_else(|| ApiError::Status {
                    status: 422,
                    body: format!("missing chunk {chunk} of {}", file.record.path),
                })?;
                data.extend_from_slice(part);
            }
            if Checksum::compute(&data) != file.record.checksum {
                return Err(ApiError::Status {
                    status: 422,
                    body: format!("checksum mismatch for {}", file.record.path),
                });
            }
            uploaded.push((file.record.path.clone(), data));
        }

        let now = state.tick();
        let project = state.project_mut(&tx.project)?;
        for (path, data) in uploaded {
            project.files.insert(path, data);
        }
        for removed in &tx.changes.removed {
            project.files.remove(&removed.path);
        }
        project.version += 1;
        project.updated = now;
        Ok(project.info(&tx.project))
    }

    async fn push_cancel(&self, _ctx: &RequestContext, transaction: &str) -> Result<(), ApiError> {
        self.online()?;
        self.state.lock().transactions.remove(transaction);
        self.push_cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
