//! Core request types
//!
//! Project identity, per-call request context and listing queries.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Project identity `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId {
    /// Owning namespace (user or organisation)
    pub namespace: String,
    /// Project name within the namespace
    pub name: String,
}

impl ProjectId {
    /// Create project id
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Full project name `namespace/name`
    #[must_use]
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl Display for ProjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ProjectId {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(ApiError::InvalidProjectId(s.to_string())),
        }
    }
}

/// Per-call context: where to send the request and with which token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Service root, ending in `/`
    pub api_root: String,
    /// Auth token, when logged in
    pub token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl RequestContext {
    /// Create unauthenticated context
    #[must_use]
    pub fn new(api_root: impl Into<String>) -> Self {
        Self {
            api_root: api_root.into(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// With auth token
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// With timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Token, or [`ApiError::AuthRequired`]
    ///
    /// # Errors
    /// No token present
    pub fn require_token(&self) -> Result<&str, ApiError> {
        self.token.as_deref().ok_or(ApiError::AuthRequired)
    }

    /// Absolute URL for an endpoint path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path.trim_start_matches('/'))
    }
}

/// Ownership filter for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListFlag {
    /// Projects the user created
    Created,
    /// Projects shared with the user
    Shared,
}

impl ListFlag {
    /// Query parameter value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Shared => "shared",
        }
    }
}

/// Listing request parameters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// Name search expression
    pub search: Option<String>,
    /// Restrict to a user's projects
    pub user: Option<String>,
    /// Ownership filter
    pub flag: Option<ListFlag>,
    /// Tag filter
    pub tag: Option<String>,
    /// 1-based page
    pub page: u32,
    /// Page size
    pub per_page: u32,
}

impl ListQuery {
    /// First page of the given size
    #[must_use]
    pub fn new(per_page: u32) -> Self {
        Self {
            page: 1,
            per_page,
            ..Self::default()
        }
    }

    /// With search expression
    #[inline]
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// With user filter
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// With ownership flag
    #[inline]
    #[must_use]
    pub fn with_flag(mut self, flag: Option<ListFlag>) -> Self {
        self.flag = flag;
        self
    }

    /// With tag filter
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    /// With page
    #[inline]
    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// Query string parameters in request order
    #[must_use]
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.max(1).to_string()),
            ("per_page", self.per_page.to_string()),
        ];
        if let Some(flag) = self.flag {
            params.push(("flag", flag.as_str().to_string()));
        }
        if let Some(user) = &self.user {
            params.push(("user", user.clone()));
        }
        if let Some(search) = &self.search {
            params.push(("name", search.clone()));
        }
        if let Some(tag) = &self.tag {
            params.push(("tags", tag.clone()));
        }
        params
    }
}
