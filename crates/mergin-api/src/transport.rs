//! Transport layer
//!
//! [`Transport`] is the seam between sync logic and the network. The
//! production implementation is [`HttpTransport`]; tests plug in an
//! in-memory server.

use crate::error::ApiError;
use crate::types::{ListQuery, ProjectId, RequestContext};
use crate::wire::{
    ByNamesRequest, LoginRequest, LoginResponse, PingResponse, ProjectInfo, ProjectListResponse,
    PushRequest, PushStartResponse, UserInfo,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use uuid::Uuid;

/// Stream of downloaded byte chunks
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// Remote operations of the Mergin service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Exchange credentials for a session token
    async fn authenticate(
        &self,
        ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ApiError>;

    /// Storage usage of a user
    async fn user_info(&self, ctx: &RequestContext, username: &str) -> Result<UserInfo, ApiError>;

    /// Server version probe
    async fn ping(&self, ctx: &RequestContext) -> Result<PingResponse, ApiError>;

    /// Paginated, filtered project listing
    async fn list_projects(
        &self,
        ctx: &RequestContext,
        query: &ListQuery,
    ) -> Result<ProjectListResponse, ApiError>;

    /// Listing restricted to the given full names
    async fn list_projects_by_name(
        &self,
        ctx: &RequestContext,
        names: &[String],
    ) -> Result<ProjectListResponse, ApiError>;

    /// Current version and file list of a project
    async fn project_info(
        &self,
        ctx: &RequestContext,
        project: &ProjectId,
    ) -> Result<ProjectInfo, ApiError>;

    /// Stream the content of one file at a version
    async fn download_file(
        &self,
        ctx: &RequestContext,
        project: &ProjectId,
        path: &str,
        version: Option<&str>,
    ) -> Result<ByteStream, ApiError>;

    /// Open a push transaction
    async fn push_start(
        &self,
        ctx: &RequestContext,
        project: &ProjectId,
        request: &PushRequest,
    ) -> Result<PushStartResponse, ApiError>;

    /// Send one chunk of an announced file
    async fn push_chunk(
        &self,
        ctx: &RequestContext,
        transaction: &str,
        chunk: Uuid,
        data: Vec<u8>,
    ) -> Result<(), ApiError>;

    /// Commit a push transaction, returning the new project state
    async fn push_finish(&self, ctx: &RequestContext, transaction: &str)
        -> Result<ProjectInfo, ApiError>;

    /// Abort a push transaction
    async fn push_cancel(&self, ctx: &RequestContext, transaction: &str) -> Result<(), ApiError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create transport with a fresh client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create transport reusing an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        ctx: &RequestContext,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let url = ctx.url(path);
        tracing::debug!("{} {}", method, url);
        let builder = self.client.request(method, url).timeout(ctx.timeout);
        match &ctx.token {
            Some(token) => builder.header(reqwest::header::AUTHORIZATION, token),
            None => builder,
        }
    }

    async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = Self::send(builder).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn project_path(prefix: &str, project: &ProjectId) -> String {
    format!("{prefix}/{}/{}", project.namespace, project.name)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn authenticate(
        &self,
        ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ApiError> {
        let body = LoginRequest {
            login: username.to_string(),
            password: password.to_string(),
        };
        Self::parse(self.request(reqwest::Method::POST, ctx, "v1/auth/login").json(&body)).await
    }

    async fn user_info(&self, ctx: &RequestContext, username: &str) -> Result<UserInfo, ApiError> {
        ctx.require_token()?;
        let path = format!("v1/user/{username}");
        Self::parse(self.request(reqwest::Method::GET, ctx, &path)).await
    }

    async fn ping(&self, ctx: &RequestContext) -> Result<PingResponse, ApiError> {
        Self::parse(self.request(reqwest::Method::GET, ctx, "ping")).await
    }

    async fn list_projects(
        &self,
        ctx: &RequestContext,
        query: &ListQuery,
    ) -> Result<ProjectListResponse, ApiError> {
        let builder = self
            .request(reqwest::Method::GET, ctx, "v1/project/paginated")
            .query(&query.to_params());
        let mut response: ProjectListResponse = Self::parse(builder).await?;
        if response.page == 0 {
            response.page = query.page.max(1);
        }
        Ok(response)
    }

    async fn list_projects_by_name(
        &self,
        ctx: &RequestContext,
        names: &[String],
    ) -> Result<ProjectListResponse, ApiError> {
        let body = ByNamesRequest {
            projects: names.to_vec(),
        };
        Self::parse(self.request(reqwest::Method::POST, ctx, "v1/project/by_names").json(&body))
            .await
    }

    async fn project_info(
        &self,
        ctx: &RequestContext,
        project: &ProjectId,
    ) -> Result<ProjectInfo, ApiError> {
        let path = project_path("v1/project", project);
        Self::parse(self.request(reqwest::Method::GET, ctx, &path)).await
    }

    async fn download_file(
        &self,
        ctx: &RequestContext,
        project: &ProjectId,
        path: &str,
        version: Option<&str>,
    ) -> Result<ByteStream, ApiError> {
        let mut params = vec![("file", path.to_string())];
        if let Some(version) = version {
            params.push(("version", version.to_string()));
        }
        let endpoint = project_path("v1/project/raw", project);
        let response =
            Self::send(self.request(reqwest::Method::GET, ctx, &endpoint).query(&params)).await?;
        Ok(response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(ApiError::from)
            .boxed())
    }

    async fn push_start(
        &self,
        ctx: &RequestContext,
        project: &ProjectId,
        request: &PushRequest,
    ) -> Result<PushStartResponse, ApiError> {
        ctx.require_token()?;
        let path = project_path("v1/project/push", project);
        Self::parse(self.request(reqwest::Method::POST, ctx, &path).json(request)).await
    }

    async fn push_chunk(
        &self,
        ctx: &RequestContext,
        transaction: &str,
        chunk: Uuid,
        data: Vec<u8>,
    ) -> Result<(), ApiError> {
        let path = format!("v1/project/push/chunk/{transaction}/{chunk}");
        let builder = self
            .request(reqwest::Method::POST, ctx, &path)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        Self::send(builder).await.map(|_| ())
    }

    async fn push_finish(
        &self,
        ctx: &RequestContext,
        transaction: &str,
    ) -> Result<ProjectInfo, ApiError> {
        let path = format!("v1/project/push/finish/{transaction}");
        Self::parse(self.request(reqwest::Method::POST, ctx, &path)).await
    }

    async fn push_cancel(&self, ctx: &RequestContext, transaction: &str) -> Result<(), ApiError> {
        let path = format!("v1/project/push/cancel/{transaction}");
        Self::send(self.request(reqwest::Method::POST, ctx, &path))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_paths() {
        let id = ProjectId::new("lutra", "trees");
        assert_eq!(project_path("v1/project", &id), "v1/project/lutra/trees");
        assert_eq!(project_path("v1/project/raw", &id), "v1/project/raw/lutra/trees");
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let transport = HttpTransport::new();
        let ctx = RequestContext::new("http://127.0.0.1:9/")
            .with_timeout(std::time::Duration::from_millis(500));

        let err = transport.ping(&ctx).await.unwrap_err();
        assert!(err.is_network(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn token_required_before_network() {
        let transport = HttpTransport::new();
        let ctx = RequestContext::new("http://127.0.0.1:9/");
        let err = transport.user_info(&ctx, "jan").await.unwrap_err();
        assert!(matches!(err, ApiError::AuthRequired));
    }
}
