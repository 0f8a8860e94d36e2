//! Client configuration
//!
//! Loaded from TOML; `MERGIN_API_ROOT` and `MERGIN_DATA_DIR` override the
//! file values.

use crate::error::ApiError;
use crate::version::{ApiVersion, MINIMUM_API_VERSION};
use mergin_files::{IgnoreSet, CHUNK_SIZE, DEFAULT_IGNORED_SUFFIXES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Public Mergin service
pub const DEFAULT_API_ROOT: &str = "https://public.cloudmergin.com/";

/// Tag filter applied to listings unless configured otherwise
pub const DEFAULT_LISTING_TAG: &str = "input_use";

/// Environment variable overriding the API root
pub const ENV_API_ROOT: &str = "MERGIN_API_ROOT";

/// Environment variable overriding the data directory
pub const ENV_DATA_DIR: &str = "MERGIN_DATA_DIR";

/// Sync client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Service root URL, always ending in `/`
    pub api_root: String,
    /// Directory holding all local projects
    pub data_dir: PathBuf,
    /// Transfer chunk size in bytes
    pub chunk_size: usize,
    /// Oldest server API accepted
    pub min_api_version: ApiVersion,
    /// File suffixes never synced
    pub ignored_suffixes: Vec<String>,
    /// Tag filter for listings, `None` for no filter
    pub listing_tag: Option<String>,
    /// Projects per listing page
    pub page_size: u32,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML configuration
    ///
    /// # Errors
    /// Invalid TOML or invalid values
    pub fn from_toml_str(s: &str) -> Result<Self, ApiError> {
        let config: Self = toml::from_str(s).map_err(|e| ApiError::Config(e.to_string()))?;
        config.validate()?;
        let root = config.api_root.clone();
        Ok(config.with_api_root(root))
    }

    /// Load from a TOML file, then apply environment overrides
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Unreadable or invalid file
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let config = match std::fs::read_to_string(path) {
            Ok(s) => Self::from_toml_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(ApiError::io(path, e)),
        };
        Ok(config.with_env_overrides())
    }

    /// Apply `MERGIN_API_ROOT` / `MERGIN_DATA_DIR`
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_API_ROOT).ok(),
            std::env::var(ENV_DATA_DIR).ok(),
        )
    }

    fn with_overrides(mut self, api_root: Option<String>, data_dir: Option<String>) -> Self {
        if let Some(root) = api_root.filter(|r| !r.is_empty()) {
            self = self.with_api_root(root);
        }
        if let Some(dir) = data_dir.filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Zero chunk size, page size or timeout, or an empty API root
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.api_root.trim().is_empty() {
            return Err(ApiError::Config("api_root must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(ApiError::Config("chunk_size must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(ApiError::Config("page_size must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ApiError::Config("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// With API root; a trailing `/` is added when missing
    #[must_use]
    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = normalize_root(root.into());
        self
    }

    /// With data directory
    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// With chunk size
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// With minimum API version
    #[inline]
    #[must_use]
    pub fn with_min_api_version(mut self, version: ApiVersion) -> Self {
        self.min_api_version = version;
        self
    }

    /// With ignored suffixes
    #[must_use]
    pub fn with_ignored_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// With listing tag filter
    #[inline]
    #[must_use]
    pub fn with_listing_tag(mut self, tag: Option<String>) -> Self {
        self.listing_tag = tag;
        self
    }

    /// With page size
    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Ignore set built from the configured suffixes
    #[must_use]
    pub fn ignore_set(&self) -> IgnoreSet {
        IgnoreSet::new(self.ignored_suffixes.iter().cloned())
    }

    /// Directory holding client state (`<data_dir>/.mergin`)
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join(mergin_files::METADATA_DIR)
    }

    /// Local directory of a project
    #[must_use]
    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            data_dir: PathBuf::from("."),
            chunk_size: CHUNK_SIZE,
            min_api_version: MINIMUM_API_VERSION,
            ignored_suffixes: DEFAULT_IGNORED_SUFFIXES.iter().map(|s| (*s).to_string()).collect(),
            listing_tag: Some(DEFAULT_LISTING_TAG.to_string()),
            page_size: 50,
            request_timeout_secs: 30,
        }
    }
}

fn normalize_root(mut root: String) -> String {
    if !root.ends_with('/') {
        root.push('/');
    }
    root
}
