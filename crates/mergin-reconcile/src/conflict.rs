//! Push precondition
//!
//! A push is only allowed while the server still sits at the version the
//! local copy was based on. Otherwise the caller has to update first.

use crate::diff::FileDiff;
use crate::error::ReconcileError;
use chrono::{DateTime, Utc};

/// Check that a push would not overwrite server changes
///
/// `server_changes` is the download diff of the local copy against the
/// current server state; its paths are reported on conflict.
///
/// # Errors
/// [`ReconcileError::Conflict`] when the server is newer than the local
/// base, or when the server has a version and the local copy none
pub fn check_push(
    project: &str,
    local_updated: Option<DateTime<Utc>>,
    server_updated: Option<DateTime<Utc>>,
    server_changes: &FileDiff,
) -> Result<(), ReconcileError> {
    let conflicting = match (local_updated, server_updated) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(local), Some(server)) => server > local,
    };

    if conflicting {
        return Err(ReconcileError::Conflict {
            project: project.to_string(),
            local_updated,
            server_updated,
            paths: server_changes.changed_paths(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Direction;
    use chrono::TimeZone;
    use mergin_files::{FileInventory, FileRecord};

    fn t(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap())
    }

    #[test]
    fn push_allowed_when_server_not_newer() {
        let diff = FileDiff::empty(Direction::Download);
        assert!(check_push("a/b", t(5), t(5), &diff).is_ok());
        assert!(check_push("a/b", t(5), None, &diff).is_ok());
        assert!(check_push("a/b", None, None, &diff).is_ok());
    }

    #[test]
    fn push_rejected_when_server_newer() {
        let server: FileInventory = [FileRecord::from_bytes("survey.gpkg", b"theirs")]
            .into_iter()
            .collect();
        let local: FileInventory = [FileRecord::from_bytes("survey.gpkg", b"mine")]
            .into_iter()
            .collect();
        let diff = FileDiff::compute(&local, &server, &FileInventory::new(), Direction::Download);

        let err = check_push("lutra/survey", t(1), t(2), &diff).unwrap_err();
        assert_eq!(err.paths(), ["survey.gpkg".to_string()]);
        assert!(err.to_string().contains("lutra/survey"));
    }

    #[test]
    fn push_rejected_without_local_base() {
        let diff = FileDiff::empty(Direction::Download);
        assert!(check_push("a/b", None, t(1), &diff).is_err());
    }
}
