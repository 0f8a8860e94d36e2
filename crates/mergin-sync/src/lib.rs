//! Mergin project sync
//!
//! Transfer orchestration and the projects view model on top of the
//! service layer.
//!
//! # Core Concepts
//!
//! - [`SyncSession`]: single owner of the client state; every operation
//!   returns a [`RequestId`](mergin_api::RequestId) and reports through events
//! - [`Orchestrator`]: runs downloads, updates and uploads chunk by chunk
//! - [`PendingTransfers`]: per-project lock and byte progress
//! - [`ProjectsModel`]: unified local/server projects list of one view
//! - [`LocalProjectsManager`]: project directories under the data dir
//!
//! # Example
//!
//! ```rust,ignore
//! use mergin_sync::{ModelKind, ProjectsModel, SyncSession};
//!
//! let session = SyncSession::with_http(config);
//! let mut events = session.subscribe();
//! let mut model = ProjectsModel::new(ModelKind::Explore, session.clone());
//! model.list_projects("", 1);
//! while let Ok(event) = events.recv().await {
//!     if let Some(change) = model.handle_event(&event) {
//!         println!("{change:?}: {} projects", model.len());
//!     }
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cache;
mod error;
mod local;
mod model;
mod orchestrator;
mod pending;
mod project;
mod session;
mod state;

pub use cache::{ListingCache, CACHE_FILE};
pub use error::{ErrorKind, SyncError};
pub use local::LocalProjectsManager;
pub use model::{merge_entries, ModelChange, ModelKind, ProjectsModel};
pub use orchestrator::{Orchestrator, TransferJob};
pub use pending::{PendingTransfer, PendingTransfers, TransferKind, TransferStatus};
pub use project::{LocalProject, ProjectEntry, RemoteProject};
pub use session::SyncSession;
pub use state::{allowed_transitions, validate_transition, TransferPhase};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
