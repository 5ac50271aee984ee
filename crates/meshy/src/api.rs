//! REST API client for the Meshy text-to-3D endpoints.
//!
//! Wraps task creation, task retrieval and artifact download using
//! [`reqwest`]. One [`MeshyApi`] owns one connection pool and is shared by
//! every request in a run.

use std::path::Path;
use std::time::Duration;

use meshforge_core::runner::StageRequest;

use crate::download::{self, DownloadError};
use crate::messages::{CreateTaskBody, CreateTaskResponse, TaskResponse};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.meshy.ai/openapi/v2";

/// Per-request timeout for task creation and status queries.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout for artifact downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Error bodies are truncated to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Connection settings for the Meshy API.
#[derive(Debug, Clone)]
pub struct MeshyConfig {
    /// Base URL, e.g. `https://api.meshy.ai/openapi/v2`.
    pub base_url: String,
    /// Bearer credential attached to every API request.
    pub api_key: String,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
}

impl MeshyConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// HTTP client for the Meshy API.
pub struct MeshyApi {
    client: reqwest::Client,
    config: MeshyConfig,
}

/// Errors from the Meshy REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum MeshyApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Meshy returned a non-success status code.
    #[error("Meshy API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Truncated response body for debugging.
        body: String,
    },

    /// A create call succeeded but carried no task id.
    #[error("Meshy response did not include a task id")]
    MissingTaskId,

    /// Writing the downloaded artifact failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DownloadError<reqwest::Error>> for MeshyApiError {
    fn from(e: DownloadError<reqwest::Error>) -> Self {
        match e {
            DownloadError::Source(e) => Self::Request(e),
            DownloadError::Io(e) => Self::Io(e),
        }
    }
}

impl MeshyApi {
    /// Create a client with its own connection pool.
    pub fn new(config: MeshyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: MeshyConfig) -> Self {
        Self { client, config }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Create a preview or refine task.
    ///
    /// Sends `POST /text-to-3d`. Meshy answers 200 or 202 with
    /// `{"result": "<task id>"}`.
    pub async fn create_task(&self, request: &StageRequest) -> Result<String, MeshyApiError> {
        let body = CreateTaskBody::from(request);

        let response = self
            .client
            .post(self.endpoint("text-to-3d"))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?;

        let created: CreateTaskResponse = Self::parse_response(response).await?;
        created
            .result
            .filter(|id| !id.is_empty())
            .ok_or(MeshyApiError::MissingTaskId)
    }

    /// Retrieve a task object.
    ///
    /// Sends `GET /text-to-3d/{id}`.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskResponse, MeshyApiError> {
        let response = self
            .client
            .get(self.endpoint(&format!("text-to-3d/{task_id}")))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Stream an artifact to `destination`.
    ///
    /// Artifact URLs are pre-signed, so no credential is attached.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<u64, MeshyApiError> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let written = download::write_atomically(response.bytes_stream(), destination).await?;
        Ok(written)
    }

    // ---- private helpers ----

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`MeshyApiError::ApiError`]
    /// containing the status and truncated body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, MeshyApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(MeshyApiError::ApiError {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, MeshyApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let mut config = MeshyConfig::new("k");
        config.base_url = "http://localhost:9000/openapi/v2/".to_string();
        let api = MeshyApi::new(config);
        assert_eq!(
            api.endpoint("text-to-3d/abc"),
            "http://localhost:9000/openapi/v2/text-to-3d/abc"
        );
    }

    #[test]
    fn config_defaults() {
        let config = MeshyConfig::new("secret");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.download_timeout, Duration::from_secs(120));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(1000);
        assert_eq!(truncate_body(&body).len(), MAX_ERROR_BODY_CHARS);
        assert_eq!(truncate_body("short"), "short");
    }
}
