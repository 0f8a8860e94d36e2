//! Sync event bus backed by a `tokio::sync::broadcast` channel
//!
//! Every outcome of a non-blocking operation is reported as a
//! [`SyncEvent`]. Any number of subscribers receive every event.

use crate::request::{QueryKind, RequestId};
use crate::types::ProjectId;
use crate::version::ApiVersionStatus;
use crate::wire::ProjectSummary;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Progress value reported when a transfer is cancelled
pub const PROGRESS_CANCELLED: f64 = -1.0;

/// Something that happened in the sync client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A listing request completed
    ListProjectsFinished {
        request_id: RequestId,
        kind: QueryKind,
        projects: Vec<ProjectSummary>,
        count: u64,
        page: u32,
    },
    /// A listing request failed; details follow as a separate error event
    ListProjectsFailed {
        request_id: RequestId,
        kind: QueryKind,
    },
    /// Transfer progress in `0..=1`, or [`PROGRESS_CANCELLED`]
    SyncProjectStatusChanged { project: ProjectId, progress: f64 },
    /// A transfer finished, successfully or not
    SyncProjectFinished {
        request_id: RequestId,
        project_dir: PathBuf,
        project: ProjectId,
        success: bool,
    },
    /// Files of an open project changed on disk
    ReloadProject { project_dir: PathBuf },
    NetworkErrorOccurred { message: String, detail: String },
    ApiIncompatibilityOccurred { message: String, detail: String },
    /// Short user-facing message
    Notify { message: String },
    AuthRequested,
    AuthChanged,
    AuthFailed,
    ApiRootChanged,
    ApiVersionStatusChanged { status: ApiVersionStatus },
    UserInfoChanged,
    PingFinished { version: String, message: String },
    LocalProjectAdded { project_dir: PathBuf },
    LocalProjectRemoved { project_dir: PathBuf },
    LocalProjectDataChanged { project_dir: PathBuf },
}

impl SyncEvent {
    /// Project the event is about, if any
    #[must_use]
    pub fn project(&self) -> Option<&ProjectId> {
        match self {
            Self::SyncProjectStatusChanged { project, .. }
            | Self::SyncProjectFinished { project, .. } => Some(project),
            _ => None,
        }
    }

    /// Whether the event reports a failure
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::NetworkErrorOccurred { .. }
                | Self::ApiIncompatibilityOccurred { .. }
                | Self::AuthFailed
                | Self::ListProjectsFailed { .. }
                | Self::SyncProjectFinished { success: false, .. }
        )
    }
}

/// Default buffer capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer is full.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: SyncEvent) {
        tracing::trace!("event: {:?}", event);
        // Zero receivers is not an error
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(SyncEvent::Notify {
            message: "done".into(),
        });

        assert_eq!(rx1.recv().await.unwrap(), SyncEvent::Notify { message: "done".into() });
        assert_eq!(rx2.recv().await.unwrap(), SyncEvent::Notify { message: "done".into() });
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(SyncEvent::AuthChanged);
    }

    #[test]
    fn event_classification() {
        let project = ProjectId::new("a", "b");
        let finished = SyncEvent::SyncProjectFinished {
            request_id: RequestId(1),
            project_dir: PathBuf::from("/p"),
            project: project.clone(),
            success: false,
        };
        assert!(finished.is_error());
        assert_eq!(finished.project(), Some(&project));
        assert!(!SyncEvent::AuthChanged.is_error());
    }

    #[test]
    fn event_serializes_tagged() {
        let json = serde_json::to_value(SyncEvent::PingFinished {
            version: "2020.4".into(),
            message: String::new(),
        })
        .unwrap();
        assert_eq!(json["type"], "ping_finished");
    }
}
