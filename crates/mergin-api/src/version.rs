//! Server API version compatibility

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// `major.minor` API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
}

impl ApiVersion {
    /// Create version
    #[inline]
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// Oldest server API this client talks to
pub const MINIMUM_API_VERSION: ApiVersion = ApiVersion::new(2019, 6);

impl Display for ApiVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    /// Parse the first two numeric components; trailing parts are ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("invalid version: {s:?}"))?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("invalid version: {s:?}"))?;
        Ok(Self { major, minor })
    }
}

/// Result of the last compatibility probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVersionStatus {
    /// Not checked yet, or the API root changed since
    #[default]
    Unknown,
    /// Server is compatible
    Ok,
    /// Server is older than the minimum
    Incompatible,
    /// Server did not report a usable version
    NotFound,
}

impl ApiVersionStatus {
    /// Whether the probe has passed
    #[inline]
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Compare a server-reported version with the minimum
#[must_use]
pub fn check_version(server: Option<&str>, minimum: ApiVersion) -> ApiVersionStatus {
    let Some(raw) = server.filter(|v| !v.trim().is_empty()) else {
        return ApiVersionStatus::NotFound;
    };
    match raw.parse::<ApiVersion>() {
        Ok(version) if version >= minimum => ApiVersionStatus::Ok,
        Ok(_) => ApiVersionStatus::Incompatible,
        Err(e) => {
            tracing::warn!("{}", e);
            ApiVersionStatus::NotFound
        }
    }
}
