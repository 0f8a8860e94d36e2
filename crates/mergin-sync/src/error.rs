//! Error types for sync operations
//!
//! Every failure maps to an [`ErrorKind`] and is reported to subscribers
//! as an event carrying a message and a detail string.

use mergin_api::{ApiError, EventBus, SyncEvent};
use mergin_files::ScanError;
use mergin_reconcile::ReconcileError;
use std::path::PathBuf;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure or unexpected server response
    Network,
    /// Rejected or missing credentials
    Auth,
    /// Server API version not supported
    ApiIncompatibility,
    /// Server moved on since the local base version
    ReconciliationConflict,
    /// Some files were transferred before the failure
    PartialTransferFailure,
    /// Local filesystem failure
    Local,
    /// Caller error: already pending, unknown project
    Usage,
}

/// Sync errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transport or credential failure
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Push precondition failed
    #[error(transparent)]
    Conflict(#[from] ReconcileError),

    /// Project directory or metadata failure
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// IO error for a specific path
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A transfer for the project is already running
    #[error("project {0} is already syncing")]
    AlreadyPending(String),

    /// Project not known locally or on the server
    #[error("unknown project: {0}")]
    UnknownProject(String),

    /// Server file list names a path outside the project
    #[error("refusing unsafe path {0:?}")]
    UnsafePath(String),

    /// Transfer failed after some files completed
    #[error("{project}: transfer failed after {completed} files: {source}")]
    PartialTransfer {
        project: String,
        completed: usize,
        #[source]
        source: Box<SyncError>,
    },

    /// Transfer phase change not allowed
    #[error("illegal transfer transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Cancelled by the caller
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(e) => match e {
                ApiError::Unauthorized(_) | ApiError::AuthRequired => ErrorKind::Auth,
                ApiError::Incompatible { .. } => ErrorKind::ApiIncompatibility,
                ApiError::Conflict(_) => ErrorKind::ReconciliationConflict,
                ApiError::Io { .. } => ErrorKind::Local,
                ApiError::Config(_) | ApiError::InvalidProjectId(_) => ErrorKind::Usage,
                _ => ErrorKind::Network,
            },
            Self::Conflict(_) => ErrorKind::ReconciliationConflict,
            Self::Scan(_) | Self::Io { .. } | Self::UnsafePath(_) => ErrorKind::Local,
            Self::PartialTransfer { .. } => ErrorKind::PartialTransferFailure,
            Self::AlreadyPending(_)
            | Self::UnknownProject(_)
            | Self::IllegalTransition { .. }
            | Self::Cancelled => ErrorKind::Usage,
        }
    }

    /// Check if the caller cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retryable(),
            Self::PartialTransfer { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Detail string for error events
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Api(e) => e.detail(),
            Self::Conflict(e) => e.paths().join(", "),
            Self::PartialTransfer { source, .. } => source.detail(),
            Self::Io { source, .. } => source.to_string(),
            _ => String::new(),
        }
    }

    /// Wrap as partial failure when files were already transferred
    #[must_use]
    pub fn after_files(self, project: &str, completed: usize) -> Self {
        if completed == 0 || self.is_cancelled() {
            return self;
        }
        Self::PartialTransfer {
            project: project.to_string(),
            completed,
            source: Box::new(self),
        }
    }

    /// Publish the events reporting this error
    pub fn report(&self, bus: &EventBus) {
        let message = self.to_string();
        match self.kind() {
            ErrorKind::Auth => {
                if matches!(self, Self::Api(ApiError::AuthRequired)) {
                    bus.publish(SyncEvent::AuthRequested);
                } else {
                    bus.publish(SyncEvent::AuthFailed);
                }
            }
            ErrorKind::ApiIncompatibility => bus.publish(SyncEvent::ApiIncompatibilityOccurred {
                message,
                detail: self.detail(),
            }),
            ErrorKind::Network => bus.publish(SyncEvent::NetworkErrorOccurred {
                message,
                detail: self.detail(),
            }),
            ErrorKind::ReconciliationConflict
            | ErrorKind::PartialTransferFailure
            | ErrorKind::Local
            | ErrorKind::Usage => {
                if !self.is_cancelled() {
                    bus.publish(SyncEvent::Notify { message });
                }
            }
        }
    }
}
