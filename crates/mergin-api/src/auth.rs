//! Credential store
//!
//! Holds the logged-in session and persists it to
//! `<data_dir>/.mergin/auth.json`. Password and token are base64 encoded
//! in the file; this is an encoding, not encryption.

use crate::error::ApiError;
use crate::wire::LoginResponse;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Credentials file name inside the client state directory
pub const AUTH_FILE: &str = "auth.json";

/// Logged-in session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub username: String,
    pub user_id: i64,
    /// Value sent in the `Authorization` header
    pub token: String,
    pub expires: DateTime<Utc>,
    pub disk_usage: u64,
    pub storage_limit: u64,
}

impl AuthSession {
    /// Session from a login response
    #[must_use]
    pub fn from_login(login: &LoginResponse) -> Self {
        Self {
            username: login.username.clone(),
            user_id: login.id,
            token: login.session.token.clone(),
            expires: login.session.expire,
            disk_usage: login.disk_usage,
            storage_limit: login.storage_limit,
        }
    }

    /// Whether the token is past its expiry at `now`
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// On-disk form of the credentials
#[derive(Debug, Serialize, Deserialize)]
struct StoredAuth {
    username: String,
    password: String,
    user_id: i64,
    token: String,
    expires: DateTime<Utc>,
    #[serde(default)]
    disk_usage: u64,
    #[serde(default)]
    storage_limit: u64,
}

#[derive(Debug, Clone)]
struct Credentials {
    session: AuthSession,
    password: String,
}

impl Credentials {
    fn encode(&self) -> StoredAuth {
        StoredAuth {
            username: self.session.username.clone(),
            password: general_purpose::STANDARD.encode(&self.password),
            user_id: self.session.user_id,
            token: general_purpose::STANDARD.encode(&self.session.token),
            expires: self.session.expires,
            disk_usage: self.session.disk_usage,
            storage_limit: self.session.storage_limit,
        }
    }

    fn decode(stored: StoredAuth) -> Result<Self, ApiError> {
        let text = |field: &str, value: &str| -> Result<String, ApiError> {
            let bytes = general_purpose::STANDARD
                .decode(value)
                .map_err(|e| ApiError::Decode(format!("{field}: {e}")))?;
            String::from_utf8(bytes).map_err(|e| ApiError::Decode(format!("{field}: {e}")))
        };
        Ok(Self {
            password: text("password", &stored.password)?,
            session: AuthSession {
                token: text("token", &stored.token)?,
                username: stored.username,
                user_id: stored.user_id,
                expires: stored.expires,
                disk_usage: stored.disk_usage,
                storage_limit: stored.storage_limit,
            },
        })
    }
}

/// Thread-safe session holder backed by a JSON file
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    state: RwLock<Option<Credentials>>,
}

impl CredentialStore {
    /// Empty store persisting to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(None),
        }
    }

    /// Store persisting to `<state_dir>/auth.json`, loading it if present
    ///
    /// An unreadable or corrupt file is logged and treated as logged out.
    #[must_use]
    pub fn open(state_dir: &Path) -> Self {
        let store = Self::new(state_dir.join(AUTH_FILE));
        if let Err(e) = store.load() {
            tracing::warn!("ignoring stored credentials: {}", e);
        }
        store
    }

    /// Reload credentials from disk
    ///
    /// # Errors
    /// IO failure or undecodable file
    pub fn load(&self) -> Result<bool, ApiError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ApiError::io(&self.path, e)),
        };
        let stored: StoredAuth = serde_json::from_slice(&data)?;
        let credentials = Credentials::decode(stored)?;
        tracing::debug!("loaded credentials for {}", credentials.session.username);
        *self.state.write() = Some(credentials);
        Ok(true)
    }

    /// Store a new session and persist it
    ///
    /// # Errors
    /// Persisting failed; the session is kept in memory regardless
    pub fn set(&self, session: AuthSession, password: impl Into<String>) -> Result<(), ApiError> {
        *self.state.write() = Some(Credentials {
            session,
            password: password.into(),
        });
        self.save()
    }

    /// Update storage usage of the current session
    ///
    /// # Errors
    /// Persisting failed
    pub fn update_usage(&self, disk_usage: u64, storage_limit: u64) -> Result<bool, ApiError> {
        {
            let mut state = self.state.write();
            let Some(credentials) = state.as_mut() else {
                return Ok(false);
            };
            credentials.session.disk_usage = disk_usage;
            credentials.session.storage_limit = storage_limit;
        }
        self.save().map(|()| true)
    }

    /// Wipe memory and the persisted record
    ///
    /// # Errors
    /// Removing the file failed
    pub fn clear(&self) -> Result<(), ApiError> {
        *self.state.write() = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::io(&self.path, e)),
        }
    }

    /// Current session, expired or not
    #[must_use]
    pub fn session(&self) -> Option<AuthSession> {
        self.state.read().as_ref().map(|c| c.session.clone())
    }

    /// Logged-in username
    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.state.read().as_ref().map(|c| c.session.username.clone())
    }

    /// Username and password for re-login after expiry
    #[must_use]
    pub fn login_credentials(&self) -> Option<(String, String)> {
        self.state
            .read()
            .as_ref()
            .filter(|c| !c.password.is_empty())
            .map(|c| (c.session.username.clone(), c.password.clone()))
    }

    /// Token, when present and not expired
    #[must_use]
    pub fn token(&self) -> Option<String> {
        let now = Utc::now();
        self.state
            .read()
            .as_ref()
            .filter(|c| !c.session.token.is_empty() && !c.session.is_expired_at(now))
            .map(|c| c.session.token.clone())
    }

    /// Whether a usable token is present
    #[must_use]
    pub fn has_auth_data(&self) -> bool {
        self.token().is_some()
    }

    /// Persisted file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), ApiError> {
        let Some(stored) = self.state.read().as_ref().map(Credentials::encode) else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApiError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(&stored)?;
        std::fs::write(&self.path, json).map_err(|e| ApiError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires: DateTime<Utc>) -> AuthSession {
        AuthSession {
            username: "jan".into(),
            user_id: 7,
            token: "Bearer abc".into(),
            expires,
            disk_usage: 10,
            storage_limit: 100,
        }
    }

    #[test]
    fn credentials_persist_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path());
        assert!(!store.has_auth_data());

        store.set(session(Utc::now() + Duration::hours(1)), "s3cret").unwrap();
        assert!(store.has_auth_data());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("s3cret"));
        assert!(!raw.contains("Bearer abc"));

        let reopened = CredentialStore::open(dir.path());
        assert_eq!(reopened.token().as_deref(), Some("Bearer abc"));
        assert_eq!(
            reopened.login_credentials(),
            Some(("jan".to_string(), "s3cret".to_string()))
        );
    }

    #[test]
    fn expired_token_is_not_auth_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path());
        store.set(session(Utc::now() - Duration::minutes(1)), "pw").unwrap();

        assert!(!store.has_auth_data());
        assert!(store.session().is_some());
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path());
        store.set(session(Utc::now() + Duration::hours(1)), "pw").unwrap();

        store.clear().unwrap();
        assert!(!store.path().exists());
        assert!(store.session().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn update_usage_requires_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path());
        assert!(!store.update_usage(1, 2).unwrap());

        store.set(session(Utc::now() + Duration::hours(1)), "pw").unwrap();
        assert!(store.update_usage(50, 500).unwrap());
        assert_eq!(store.session().unwrap().disk_usage, 50);
    }

    #[test]
    fn corrupt_file_is_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(AUTH_FILE), b"not json").unwrap();
        let store = CredentialStore::open(dir.path());
        assert!(store.session().is_none());
    }
}
