//! Mergin project files
//!
//! Local file inventories for project directories.
//!
//! # Core Concepts
//!
//! - [`Checksum`]: SHA-256 content digest, hex encoded on the wire
//! - [`FileRecord`]: path + checksum + size of one project file
//! - [`FileInventory`]: path-keyed set of records
//! - [`Scanner`]: synchronous, failure-tolerant directory scanner
//! - [`ProjectMetadata`]: last-synced state stored inside each project
//!
//! # Example
//!
//! ```rust,ignore
//! use mergin_files::Scanner;
//!
//! let scanner = Scanner::default();
//! let inventory = scanner.inventory(project_dir);
//! println!("{} files, {} bytes", inventory.len(), inventory.total_size());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod checksum;
mod error;
mod metadata;
mod record;
mod scanner;

pub use checksum::{Checksum, ChecksumError, CHUNK_SIZE};
pub use error::ScanError;
pub use metadata::{ProjectMetadata, METADATA_FILE};
pub use record::{FileInventory, FileRecord};
pub use scanner::{
    resolve_in_project, IgnoreSet, Scanner, DEFAULT_IGNORED_SUFFIXES, METADATA_DIR,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
