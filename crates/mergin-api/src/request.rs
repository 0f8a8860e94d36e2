//! Request correlation
//!
//! Every non-blocking operation gets a [`RequestId`]. Ids increase
//! monotonically, so a consumer that remembers the id it issued last can
//! drop any response carrying another one.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, monotonically increasing request id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of a tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Authorize,
    UserInfo,
    Ping,
    ListProjects,
    ListProjectsByName,
    Download,
    Update,
    Upload,
}

impl QueryKind {
    /// Whether the request moves project files
    #[inline]
    #[must_use]
    pub fn is_transfer(self) -> bool {
        matches!(self, Self::Download | Self::Update | Self::Upload)
    }
}

/// Issues request ids and tracks the ones in flight
#[derive(Debug)]
pub struct RequestTracker {
    next: AtomicU64,
    latest: DashMap<QueryKind, RequestId>,
    in_flight: DashMap<RequestId, (QueryKind, String)>,
}

impl RequestTracker {
    /// Create tracker; the first id issued is 1
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            latest: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Issue an id for a request about `key` (usually a full project name)
    pub fn issue(&self, kind: QueryKind, key: impl Into<String>) -> RequestId {
        let id = RequestId(self.next.fetch_add(1, Ordering::SeqCst));
        self.latest.insert(kind, id);
        self.in_flight.insert(id, (kind, key.into()));
        id
    }

    /// Mark a request finished, returning its key
    pub fn complete(&self, id: RequestId) -> Option<String> {
        self.in_flight.remove(&id).map(|(_, (_, key))| key)
    }

    /// Whether `id` is the last one issued for `kind`
    #[must_use]
    pub fn is_latest(&self, kind: QueryKind, id: RequestId) -> bool {
        self.latest.get(&kind).is_some_and(|latest| *latest == id)
    }

    /// Last id issued for `kind`
    #[must_use]
    pub fn latest(&self, kind: QueryKind) -> Option<RequestId> {
        self.latest.get(&kind).map(|id| *id)
    }

    /// Whether a request is still in flight
    #[must_use]
    pub fn is_in_flight(&self, id: RequestId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Number of requests in flight
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}
