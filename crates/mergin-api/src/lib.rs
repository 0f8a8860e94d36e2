//! Mergin service layer
//!
//! Everything the sync client needs to talk to the service and to report
//! back to its callers.
//!
//! # Core Concepts
//!
//! - [`Transport`]: one async method per remote operation
//! - [`HttpTransport`]: reqwest implementation
//! - [`CredentialStore`]: session token and persisted login
//! - [`RequestTracker`]: monotonic request ids for stale-response checks
//! - [`EventBus`]: broadcast of [`SyncEvent`]s
//! - [`SyncConfig`]: TOML + environment configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use mergin_api::{HttpTransport, RequestContext, Transport};
//!
//! let transport = HttpTransport::new();
//! let ctx = RequestContext::new("https://public.cloudmergin.com/");
//! let ping = transport.ping(&ctx).await?;
//! println!("server {}", ping.version);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod auth;
mod config;
mod error;
mod events;
mod request;
mod transport;
mod types;
mod version;
mod wire;

pub use auth::{AuthSession, CredentialStore, AUTH_FILE};
pub use config::{
    SyncConfig, DEFAULT_API_ROOT, DEFAULT_LISTING_TAG, ENV_API_ROOT, ENV_DATA_DIR,
};
pub use error::ApiError;
pub use events::{EventBus, SyncEvent, PROGRESS_CANCELLED};
pub use request::{QueryKind, RequestId, RequestTracker};
pub use transport::{ByteStream, HttpTransport, Transport};
pub use types::{ListFlag, ListQuery, ProjectId, RequestContext};
pub use version::{check_version, ApiVersion, ApiVersionStatus, MINIMUM_API_VERSION};
pub use wire::{
    ByNamesRequest, LoginRequest, LoginResponse, PingResponse, ProjectInfo, ProjectListResponse,
    ProjectSummary, PushChanges, PushFile, PushRequest, PushStartResponse, SessionToken, UserInfo,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
