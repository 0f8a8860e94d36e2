//! Per-project transfer state machine
//!
//! `Idle -> Pending -> {Succeeded, Failed} -> Idle`. Cancellation takes a
//! pending transfer straight back to `Idle`.

use crate::error::SyncError;
use mergin_reconcile::Direction;
use std::fmt::{self, Display, Formatter};

/// Phase of a project's transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    /// Nothing running
    Idle,
    /// Transfer in flight
    Pending(Direction),
    /// Transfer completed
    Succeeded,
    /// Transfer failed
    Failed,
}

impl TransferPhase {
    /// Whether a transfer is in flight
    #[inline]
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl Display for TransferPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Pending(direction) => write!(f, "pending({direction})"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Validate a phase change
///
/// # Errors
/// [`SyncError::IllegalTransition`] when `to` is not reachable from `from`
pub fn validate_transition(from: TransferPhase, to: TransferPhase) -> Result<(), SyncError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SyncError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Phases reachable from `from`
#[must_use]
pub fn allowed_transitions(from: TransferPhase) -> Vec<TransferPhase> {
    use TransferPhase::{Failed, Idle, Pending, Succeeded};
    match from {
        Idle => vec![
            Pending(Direction::Download),
            Pending(Direction::Upload),
        ],
        Pending(_) => vec![Succeeded, Failed, Idle],
        Succeeded | Failed => vec![Idle],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let pending = TransferPhase::Pending(Direction::Upload);
        assert!(validate_transition(TransferPhase::Idle, pending).is_ok());
        assert!(validate_transition(pending, TransferPhase::Succeeded).is_ok());
        assert!(validate_transition(pending, TransferPhase::Idle).is_ok());
        assert!(validate_transition(TransferPhase::Failed, TransferPhase::Idle).is_ok());
    }

    #[test]
    fn start_while_pending_is_illegal() {
        let pending = TransferPhase::Pending(Direction::Download);
        let err = validate_transition(pending, TransferPhase::Pending(Direction::Upload)).unwrap_err();
        assert!(err.to_string().contains("pending(download) -> pending(upload)"));
        assert!(validate_transition(TransferPhase::Idle, TransferPhase::Succeeded).is_err());
    }
}
