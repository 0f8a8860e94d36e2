//! JSON bodies exchanged with the Mergin service

use crate::types::ProjectId;
use chrono::{DateTime, Utc};
use mergin_files::FileRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `POST v1/auth/login` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

/// Token issued on login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Value for the `Authorization` header
    pub token: String,
    /// Expiry time
    pub expire: DateTime<Utc>,
}

/// `POST v1/auth/login` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub username: String,
    pub id: i64,
    pub session: SessionToken,
    #[serde(default)]
    pub disk_usage: u64,
    #[serde(default)]
    pub storage_limit: u64,
}

/// `GET v1/user/{username}` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub disk_usage: u64,
    #[serde(default)]
    pub storage_limit: u64,
}

/// `GET ping` response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub version: String,
}

/// One project as it appears in listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Time of the newest server version
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    /// Newest server version, e.g. `v4`
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, alias = "disk_usage")]
    pub size: u64,
    #[serde(default)]
    pub files_count: u64,
    #[serde(default)]
    pub creator: Option<i64>,
    #[serde(default)]
    pub writers: Vec<i64>,
}

impl ProjectSummary {
    /// Minimal summary
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            tags: Vec::new(),
            created: None,
            updated: None,
            version: None,
            size: 0,
            files_count: 0,
            creator: None,
            writers: Vec::new(),
        }
    }

    /// Project identity
    #[must_use]
    pub fn id(&self) -> ProjectId {
        ProjectId::new(&self.namespace, &self.name)
    }
}

/// Listing response (paginated and by-name)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectListResponse {
    #[serde(default)]
    pub projects: Vec<ProjectSummary>,
    /// Total matching projects across all pages
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub page: u32,
}

/// `POST v1/project/by_names` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByNamesRequest {
    pub projects: Vec<String>,
}

/// Full project state: `GET v1/project/{ns}/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl ProjectInfo {
    /// Project identity
    #[must_use]
    pub fn id(&self) -> ProjectId {
        ProjectId::new(&self.namespace, &self.name)
    }
}

/// File announced in a push, with the ids of its chunks in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFile {
    #[serde(flatten)]
    pub record: FileRecord,
    pub chunks: Vec<Uuid>,
}

/// Changes announced at the start of a push
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushChanges {
    pub added: Vec<PushFile>,
    pub updated: Vec<PushFile>,
    pub removed: Vec<FileRecord>,
}

impl PushChanges {
    /// Files whose chunks must be sent
    pub fn uploads(&self) -> impl Iterator<Item = &PushFile> {
        self.added.iter().chain(self.updated.iter())
    }

    /// Whether the push changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// `POST v1/project/push/{ns}/{name}` body
///
/// `version` is the server version the local copy is based on; the server
/// rejects the push with `409` when it has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub version: Option<String>,
    pub changes: PushChanges,
}

/// Push transaction handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushStartResponse {
    pub transaction: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_accepts_sparse_json() {
        let json = r#"{"namespace": "lutra", "name": "trees", "disk_usage": 42}"#;
        let summary: ProjectSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.id(), ProjectId::new("lutra", "trees"));
        assert_eq!(summary.size, 42);
        assert!(summary.updated.is_none());
    }

    #[test]
    fn push_file_flattens_record() {
        let file = PushFile {
            record: FileRecord::from_bytes("a.gpkg", b"abc"),
            chunks: vec![Uuid::nil()],
        };
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["path"], "a.gpkg");
        assert_eq!(value["size"], 3);
        assert_eq!(value["chunks"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn login_response_parses() {
        let json = r#"{
            "username": "jan",
            "id": 7,
            "session": {"token": "Bearer t0k", "expire": "2030-01-01T00:00:00Z"}
        }"#;
        let login: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(login.session.token, "Bearer t0k");
        assert_eq!(login.disk_usage, 0);
    }
}
