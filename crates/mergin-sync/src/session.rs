//! Sync session
//!
//! [`SyncSession`] owns everything the client shares between requests:
//! configuration, credentials, transport, event bus, request tracker,
//! pending transfers, local projects and the last remote listing.
//!
//! Every remote operation returns immediately with a [`RequestId`] and runs
//! on the tokio runtime; its outcome arrives as a [`SyncEvent`]. Clones
//! share the same state, so spawned work holds a clone.

use crate::cache::ListingCache;
use crate::error::SyncError;
use crate::local::LocalProjectsManager;
use crate::orchestrator::{Orchestrator, TransferJob};
use crate::pending::{PendingTransfer, PendingTransfers, TransferKind, TransferStatus};
use mergin_api::{
    check_version, ApiError, ApiVersionStatus, AuthSession, CredentialStore, EventBus,
    HttpTransport, ListFlag, ListQuery, ProjectId, ProjectSummary, QueryKind, RequestContext,
    RequestId, RequestTracker, SyncConfig, SyncEvent, Transport, UserInfo, DEFAULT_API_ROOT,
    PROGRESS_CANCELLED,
};
use mergin_files::Scanner;
use mergin_reconcile::Direction;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

struct Inner {
    config: RwLock<SyncConfig>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    credentials: CredentialStore,
    tracker: RequestTracker,
    pending: Arc<PendingTransfers>,
    local: Arc<LocalProjectsManager>,
    orchestrator: Orchestrator,
    cache: ListingCache,
    scanner: Scanner,
    remote: RwLock<Vec<ProjectSummary>>,
    api_status: RwLock<ApiVersionStatus>,
    user: RwLock<Option<UserInfo>>,
}

/// Shared client state and the operations on it
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("api_root", &self.api_root())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl SyncSession {
    /// Create a session over a transport
    ///
    /// Loads stored credentials, the cached listing and the local projects
    /// found in the data dir.
    #[must_use]
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>) -> Self {
        let bus = EventBus::default();
        let state_dir = config.state_dir();
        let credentials = CredentialStore::open(&state_dir);
        let cache = ListingCache::in_dir(&state_dir);
        let remote = cache.load();
        let scanner = Scanner::new(config.ignore_set());
        let pending = Arc::new(PendingTransfers::new());
        let local = Arc::new(LocalProjectsManager::new(config.data_dir.clone(), bus.clone()));
        let orchestrator = Orchestrator::new(
            Arc::clone(&transport),
            bus.clone(),
            Arc::clone(&pending),
            Arc::clone(&local),
            scanner.clone(),
            config.chunk_size,
        );

        tracing::info!(
            "session at {} ({} local projects, {} cached)",
            config.api_root,
            local.projects().len(),
            remote.len()
        );

        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                transport,
                bus,
                credentials,
                tracker: RequestTracker::new(),
                pending,
                local,
                orchestrator,
                cache,
                scanner,
                remote: RwLock::new(remote),
                api_status: RwLock::new(ApiVersionStatus::Unknown),
                user: RwLock::new(None),
            }),
        }
    }

    /// Create a session talking HTTP
    #[must_use]
    pub fn with_http(config: SyncConfig) -> Self {
        Self::new(config, Arc::new(HttpTransport::new()))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Snapshot of the configuration
    #[must_use]
    pub fn config(&self) -> SyncConfig {
        self.inner.config.read().clone()
    }

    /// Current API root
    #[must_use]
    pub fn api_root(&self) -> String {
        self.inner.config.read().api_root.clone()
    }

    /// Event bus
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.bus.subscribe()
    }

    /// Request id bookkeeping
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &RequestTracker {
        &self.inner.tracker
    }

    /// Directory scanner configured with the ignore set
    #[inline]
    #[must_use]
    pub fn scanner(&self) -> &Scanner {
        &self.inner.scanner
    }

    /// Local projects
    #[inline]
    #[must_use]
    pub fn local_projects(&self) -> &LocalProjectsManager {
        &self.inner.local
    }

    /// Pending transfer table
    #[inline]
    #[must_use]
    pub fn pending(&self) -> &PendingTransfers {
        &self.inner.pending
    }

    /// Progress of every transfer in flight
    #[must_use]
    pub fn pending_transfers(&self) -> Vec<(ProjectId, TransferStatus)> {
        self.inner.pending.snapshot()
    }

    /// Last remote listing
    #[must_use]
    pub fn projects(&self) -> Vec<ProjectSummary> {
        self.inner.remote.read().clone()
    }

    /// Result of the last compatibility probe
    #[must_use]
    pub fn api_version_status(&self) -> ApiVersionStatus {
        *self.inner.api_status.read()
    }

    /// Whether a non-expired token is present
    #[must_use]
    pub fn has_auth_data(&self) -> bool {
        self.inner.credentials.has_auth_data()
    }

    /// Logged-in user name
    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.inner.credentials.username()
    }

    /// Current session, expired or not
    #[must_use]
    pub fn auth_session(&self) -> Option<AuthSession> {
        self.inner.credentials.session()
    }

    /// Last fetched user info
    #[must_use]
    pub fn user_info(&self) -> Option<UserInfo> {
        self.inner.user.read().clone()
    }

    /// Listing query for a flag with the configured page size and tag
    #[must_use]
    pub fn list_query(&self, flag: Option<ListFlag>, search: &str, page: u32) -> ListQuery {
        let config = self.inner.config.read();
        let mut query = ListQuery::new(config.page_size)
            .with_flag(flag)
            .with_search(search)
            .with_tag(config.listing_tag.clone())
            .with_page(page);
        if flag.is_some() {
            if let Some(user) = self.inner.credentials.username() {
                query = query.with_user(user);
            }
        }
        query
    }

    // ------------------------------------------------------------------
    // Server and credentials
    // ------------------------------------------------------------------

    /// Log in; publishes `AuthChanged` or `AuthFailed`
    pub fn authorize(&self, username: &str, password: &str) -> RequestId {
        let username = username.to_string();
        let password = password.to_string();
        self.spawn_request(QueryKind::Authorize, username.clone(), move |this, _| async move {
            this.run_authorize(&username, password).await
        })
    }

    /// Log out, cancelling every transfer in flight
    pub fn clear_auth(&self) {
        for (project, transfer) in self.inner.pending.cancel_all() {
            self.after_cancel(&project, transfer);
        }
        if let Err(e) = self.inner.credentials.clear() {
            tracing::warn!("cannot remove stored credentials: {}", e);
        }
        *self.inner.user.write() = None;
        tracing::info!("logged out");
        self.inner.bus.publish(SyncEvent::AuthChanged);
    }

    /// Fetch storage usage of the logged-in user; publishes `UserInfoChanged`
    pub fn get_user_info(&self) -> RequestId {
        let key = self.username().unwrap_or_default();
        self.spawn_request(QueryKind::UserInfo, key, |this, _| async move {
            this.run_user_info().await
        })
    }

    /// Probe the server version; publishes `PingFinished`
    pub fn ping_server(&self) -> RequestId {
        self.spawn_request(QueryKind::Ping, self.api_root(), |this, _| async move {
            this.run_ping().await
        })
    }

    /// Point the client at another server
    ///
    /// The compatibility status is reset so the next request probes again.
    ///
    /// # Errors
    /// The root is not a valid URL prefix
    pub fn set_api_root(&self, root: &str) -> Result<(), SyncError> {
        {
            let mut config = self.inner.config.write();
            let updated = config.clone().with_api_root(root);
            updated.validate()?;
            if updated.api_root == config.api_root {
                return Ok(());
            }
            *config = updated;
        }
        tracing::info!("api root changed to {}", self.api_root());
        self.set_api_status(ApiVersionStatus::Unknown);
        self.inner.bus.publish(SyncEvent::ApiRootChanged);
        Ok(())
    }

    /// Point the client back at the public server
    pub fn reset_api_root(&self) {
        if let Err(e) = self.set_api_root(DEFAULT_API_ROOT) {
            tracing::warn!("cannot reset api root: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    /// Fetch one page of projects; publishes `ListProjectsFinished`
    pub fn list_projects(&self, query: ListQuery) -> RequestId {
        let key = format!("{:?}:{}", query.flag, query.page);
        self.spawn_request(QueryKind::ListProjects, key, move |this, id| async move {
            let result = match this.context(false).await {
                Ok(ctx) => this
                    .inner
                    .transport
                    .list_projects(&ctx, &query)
                    .await
                    .map_err(SyncError::from),
                Err(e) => Err(e),
            };
            this.finish_listing(id, QueryKind::ListProjects, result)
        })
    }

    /// Fetch server state of every local project
    pub fn list_projects_by_name(&self) -> RequestId {
        let names = self.inner.local.project_names();
        let key = names.join(",");
        self.spawn_request(QueryKind::ListProjectsByName, key, move |this, id| async move {
            let result = if names.is_empty() {
                Ok(mergin_api::ProjectListResponse::default())
            } else {
                match this.context(false).await {
                    Ok(ctx) => this
                        .inner
                        .transport
                        .list_projects_by_name(&ctx, &names)
                        .await
                        .map_err(SyncError::from),
                    Err(e) => Err(e),
                }
            };
            this.finish_listing(id, QueryKind::ListProjectsByName, result)
        })
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    /// Download a project into the data dir
    ///
    /// # Errors
    /// The project is already syncing
    pub fn download_project(&self, project: &ProjectId) -> Result<RequestId, SyncError> {
        self.start_transfer(project, TransferKind::Download)
    }

    /// Pull the server version into the local copy
    ///
    /// # Errors
    /// The project is already syncing or has no local copy
    pub fn update_project(&self, project: &ProjectId) -> Result<RequestId, SyncError> {
        self.start_transfer(project, TransferKind::Update)
    }

    /// Push local changes
    ///
    /// # Errors
    /// The project is already syncing or has no local copy
    pub fn upload_project(&self, project: &ProjectId) -> Result<RequestId, SyncError> {
        self.start_transfer(project, TransferKind::Upload)
    }

    /// Cancel a running download or update
    pub fn update_cancel(&self, project: &ProjectId) -> bool {
        self.cancel_transfer(project, Direction::Download)
    }

    /// Cancel a running upload
    pub fn upload_cancel(&self, project: &ProjectId) -> bool {
        self.cancel_transfer(project, Direction::Upload)
    }

    fn start_transfer(&self, project: &ProjectId, kind: TransferKind) -> Result<RequestId, SyncError> {
        if self.inner.pending.is_pending(project) {
            return Err(SyncError::AlreadyPending(project.to_string()));
        }
        let project_dir = match kind {
            TransferKind::Download => self
                .inner
                .local
                .dir_for(project, |dir| self.inner.pending.uses_dir(dir)),
            TransferKind::Update | TransferKind::Upload => self
                .inner
                .local
                .project_by_id(project)
                .map(|p| p.path)
                .ok_or_else(|| SyncError::UnknownProject(project.to_string()))?,
        };

        let request_id = self
            .inner
            .tracker
            .issue(kind.query_kind(), project.to_string());
        let token = match self
            .inner
            .pending
            .begin(project, kind, request_id, &project_dir)
        {
            Ok(token) => token,
            Err(e) => {
                self.inner.tracker.complete(request_id);
                return Err(e);
            }
        };
        self.inner.bus.publish(SyncEvent::SyncProjectStatusChanged {
            project: project.clone(),
            progress: 0.0,
        });

        let job = TransferJob {
            project: project.clone(),
            kind,
            project_dir,
            request_id,
            token,
        };
        let this = self.clone();
        tokio::spawn(async move {
            let result = match this.context(kind == TransferKind::Upload).await {
                Ok(ctx) => this.inner.orchestrator.run(&ctx, &job).await,
                Err(e) => Err(e),
            };
            this.inner.orchestrator.complete(&job, &result);
            this.inner.tracker.complete(job.request_id);
        });
        Ok(request_id)
    }

    fn cancel_transfer(&self, project: &ProjectId, direction: Direction) -> bool {
        let running = self
            .inner
            .pending
            .get(project)
            .is_some_and(|t| t.kind.direction() == direction);
        if !running {
            return false;
        }
        match self.inner.pending.cancel(project) {
            Some(transfer) => {
                self.after_cancel(project, transfer);
                true
            }
            None => false,
        }
    }

    fn after_cancel(&self, project: &ProjectId, transfer: PendingTransfer) {
        self.inner.tracker.complete(transfer.request_id);
        self.inner.bus.publish(SyncEvent::SyncProjectStatusChanged {
            project: project.clone(),
            progress: PROGRESS_CANCELLED,
        });
        if transfer.project_dir.exists() {
            self.inner.local.add_or_refresh(&transfer.project_dir);
        }

        if let Some(transaction) = transfer.transaction {
            let ctx = self
                .base_context()
                .with_token(self.inner.credentials.token());
            let transport = Arc::clone(&self.inner.transport);
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = transport.push_cancel(&ctx, &transaction).await {
                            tracing::warn!("push cancel of {} failed: {}", transaction, e);
                        }
                    });
                }
                Err(_) => tracing::warn!(
                    "no runtime to cancel push transaction {} of {}",
                    transaction,
                    project
                ),
            }
        }
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    fn spawn_request<F, Fut>(&self, kind: QueryKind, key: impl Into<String>, run: F) -> RequestId
    where
        F: FnOnce(SyncSession, RequestId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let id = self.inner.tracker.issue(kind, key);
        let this = self.clone();
        tokio::spawn(async move {
            let result = run(this.clone(), id).await;
            this.inner.tracker.complete(id);
            if let Err(e) = result {
                tracing::warn!("{:?} {} failed: {}", kind, id, e);
                e.report(&this.inner.bus);
            }
        });
        id
    }

    fn finish_listing(
        &self,
        id: RequestId,
        kind: QueryKind,
        result: Result<mergin_api::ProjectListResponse, SyncError>,
    ) -> Result<(), SyncError> {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.inner.bus.publish(SyncEvent::ListProjectsFailed { request_id: id, kind });
                return Err(e);
            }
        };

        if self.inner.tracker.is_latest(kind, id) {
            *self.inner.remote.write() = response.projects.clone();
            if let Err(e) = self.inner.cache.save(&response.projects) {
                tracing::warn!("cannot write listing cache: {}", e);
            }
        } else {
            tracing::debug!("{:?} {} superseded", kind, id);
        }

        self.inner.bus.publish(SyncEvent::ListProjectsFinished {
            request_id: id,
            kind,
            count: response.count,
            page: response.page,
            projects: response.projects,
        });
        Ok(())
    }

    fn base_context(&self) -> RequestContext {
        let config = self.inner.config.read();
        RequestContext::new(config.api_root.clone()).with_timeout(config.request_timeout())
    }

    /// Context for a request, probing compatibility first
    ///
    /// With `require_auth` a missing or expired token is renewed from the
    /// stored login, failing with `AuthRequired` when there is none.
    async fn context(&self, require_auth: bool) -> Result<RequestContext, SyncError> {
        let ctx = self.base_context();
        self.ensure_compatible(&ctx).await?;

        if let Some(token) = self.inner.credentials.token() {
            return Ok(ctx.with_token(Some(token)));
        }
        let Some((login, password)) = self.inner.credentials.login_credentials() else {
            if require_auth {
                return Err(ApiError::AuthRequired.into());
            }
            return Ok(ctx);
        };

        tracing::info!("session of {} expired, logging in again", login);
        let response = self
            .inner
            .transport
            .authenticate(&ctx, &login, &password)
            .await?;
        self.inner
            .credentials
            .set(AuthSession::from_login(&response), password)?;
        self.inner.bus.publish(SyncEvent::AuthChanged);
        Ok(ctx.with_token(self.inner.credentials.token()))
    }

    async fn ensure_compatible(&self, ctx: &RequestContext) -> Result<(), SyncError> {
        if self.api_version_status().is_ok() {
            return Ok(());
        }
        let ping = self.inner.transport.ping(ctx).await?;
        let minimum = self.inner.config.read().min_api_version;
        let status = check_version(Some(&ping.version), minimum);
        self.set_api_status(status);
        if status.is_ok() {
            Ok(())
        } else {
            Err(ApiError::Incompatible {
                server: ping.version,
                minimum: minimum.to_string(),
            }
            .into())
        }
    }

    fn set_api_status(&self, status: ApiVersionStatus) {
        let changed = {
            let mut current = self.inner.api_status.write();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            tracing::debug!("api version status: {:?}", status);
            self.inner
                .bus
                .publish(SyncEvent::ApiVersionStatusChanged { status });
        }
    }

    async fn run_authorize(&self, username: &str, password: String) -> Result<(), SyncError> {
        let ctx = self.base_context();
        self.ensure_compatible(&ctx).await?;
        let response = self
            .inner
            .transport
            .authenticate(&ctx, username, &password)
            .await?;
        self.inner
            .credentials
            .set(AuthSession::from_login(&response), password)?;
        tracing::info!("logged in as {}", response.username);
        self.inner.bus.publish(SyncEvent::AuthChanged);
        Ok(())
    }

    async fn run_user_info(&self) -> Result<(), SyncError> {
        let ctx = self.context(true).await?;
        let username = self.username().ok_or(ApiError::AuthRequired)?;
        let info = self.inner.transport.user_info(&ctx, &username).await?;
        self.inner
            .credentials
            .update_usage(info.disk_usage, info.storage_limit)?;
        *self.inner.user.write() = Some(info);
        self.inner.bus.publish(SyncEvent::UserInfoChanged);
        Ok(())
    }

    async fn run_ping(&self) -> Result<(), SyncError> {
        let ctx = self.base_context();
        let ping = self.inner.transport.ping(&ctx).await?;
        let minimum = self.inner.config.read().min_api_version;
        let status = check_version(Some(&ping.version), minimum);
        self.set_api_status(status);
        let message = if status.is_ok() {
            String::new()
        } else {
            format!("server version {} is older than {}", ping.version, minimum)
        };
        self.inner.bus.publish(SyncEvent::PingFinished {
            version: ping.version,
            message,
        });
        Ok(())
    }
}
