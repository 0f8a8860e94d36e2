//! Error types for the Mergin service layer
//!
//! Provides error handling for:
//! - Network and HTTP status failures
//! - Authentication failures
//! - API version incompatibility
//! - Configuration and credential persistence

use std::path::PathBuf;

/// Errors raised by transports, credential store and configuration
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Connection failed, timed out or the body could not be read
    #[error("network error: {message}")]
    Network {
        /// Human-readable message
        message: String,
        /// Additional detail for diagnostics
        detail: String,
    },

    /// Server rejected the credentials or the token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A call needing a token was made without one
    #[error("authentication required")]
    AuthRequired,

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Server refused the change because the project moved on
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-2xx status
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Server API version below the supported minimum
    #[error("incompatible server API version {server} (need {minimum})")]
    Incompatible {
        /// Version reported by the server, empty when none
        server: String,
        /// Minimum supported version
        minimum: String,
    },

    /// Response body did not match the expected schema
    #[error("invalid response: {0}")]
    Decode(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Project name not in `namespace/name` form
    #[error("invalid project id: {0:?}")]
    InvalidProjectId(String),

    /// Local persistence failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// Create network error
    pub fn network(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            detail: detail.into(),
        }
    }

    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map an HTTP status and body to an error
    #[must_use]
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            404 => Self::NotFound(body),
            409 => Self::Conflict(body),
            _ => Self::Status { status, body },
        }
    }

    /// Check if error is an authentication problem
    #[inline]
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::AuthRequired)
    }

    /// Check if error comes from the network
    #[inline]
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Detail string reported alongside the message
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Network { detail, .. } => detail.clone(),
            Self::Status { body, .. } => body.clone(),
            Self::Unauthorized(body) | Self::NotFound(body) | Self::Conflict(body) => body.clone(),
            Self::Io { source, .. } => source.to_string(),
            _ => String::new(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Decode(e.to_string());
        }
        let message = if e.is_timeout() {
            "request timed out"
        } else if e.is_connect() {
            "could not connect to server"
        } else {
            "request failed"
        };
        Self::network(message, e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(ApiError::from_status(401, String::new()), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(403, String::new()), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(404, String::new()), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from_status(409, String::new()), ApiError::Conflict(_)));
        assert!(matches!(
            ApiError::from_status(502, "bad gateway".into()),
            ApiError::Status { status: 502, .. }
        ));
    }

    #[test]
    fn classification() {
        assert!(ApiError::network("down", "").is_retryable());
        assert!(ApiError::from_status(503, String::new()).is_retryable());
        assert!(!ApiError::from_status(400, String::new()).is_retryable());
        assert!(ApiError::AuthRequired.is_auth());
        assert!(!ApiError::AuthRequired.is_network());
    }

    #[test]
    fn detail_carries_body() {
        let err = ApiError::from_status(500, "boom".into());
        assert_eq!(err.detail(), "boom");
    }
}
