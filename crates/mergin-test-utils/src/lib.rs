//! Testing utilities for the Mergin sync workspace
//!
//! Shared test helpers: an in-memory [`FakeServer`] implementing the
//! transport trait and project directory fixtures.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

mod fixtures;
mod server;

pub use fixtures::{project_dir_with, read_file, test_config, write_file};
pub use server::{FakeServer, FAKE_SERVER_VERSION};
