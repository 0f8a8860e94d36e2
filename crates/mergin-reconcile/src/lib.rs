//! Mergin reconciliation engine
//!
//! Pure functions comparing a local project copy with the server state.
//!
//! # Core Concepts
//!
//! - [`project_status`]: the only way a [`ProjectStatus`] is produced
//! - [`FileDiff`]: files to transfer for a [`Direction`]
//! - [`check_push`]: refuses uploads over newer server versions
//!
//! # Example
//!
//! ```rust,ignore
//! use mergin_reconcile::{Direction, FileDiff};
//!
//! let diff = FileDiff::compute(&local, &server, &base, Direction::Download);
//! for record in diff.transfers() {
//!     fetch(&record.path).await?;
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod conflict;
mod diff;
mod error;
mod status;

pub use conflict::check_push;
pub use diff::{Direction, FileDiff};
pub use error::ReconcileError;
pub use status::{project_status, ProjectStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
