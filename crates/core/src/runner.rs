//! The remote job runner abstraction.
//!
//! A [`JobRunner`] is anything that can submit a generation stage, report
//! the status of a submitted task, and download a finished artifact. The
//! pipeline only talks to this trait so tests can substitute an in-memory
//! double for the HTTP client.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::StageKind;
use crate::work_item::GenerationParams;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A stage submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRequest {
    /// Draft mesh generated from the prompt.
    Preview(GenerationParams),
    /// Textured mesh derived from a succeeded preview task.
    Refine {
        preview_task_id: String,
        enable_pbr: bool,
    },
}

impl StageRequest {
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Preview(_) => StageKind::Preview,
            Self::Refine { .. } => StageKind::Refine,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote status
// ---------------------------------------------------------------------------

/// Status of a remote task as reported by the service.
///
/// [`RemoteStatus::Error`] never comes from the service itself: it marks a
/// query that failed in transport or returned a non-success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
    Expired,
    Error,
    /// Any status string this client does not recognise. Treated as running.
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    /// Whether no further change is expected for this task.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::Expired | Self::Error
        )
    }

    /// Terminal, but not a success.
    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != Self::Succeeded
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Model file formats the service can produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    #[default]
    Glb,
    Fbx,
    Obj,
    Usdz,
}

impl ArtifactFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Glb => "glb",
            Self::Fbx => "fbx",
            Self::Obj => "obj",
            Self::Usdz => "usdz",
        }
    }
}

impl std::str::FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glb" => Ok(Self::Glb),
            "fbx" => Ok(Self::Fbx),
            "obj" => Ok(Self::Obj),
            "usdz" => Ok(Self::Usdz),
            other => Err(format!(
                "unknown artifact format '{other}', expected one of glb, fbx, obj, usdz"
            )),
        }
    }
}

/// Download URLs for a finished task, one per format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUrls {
    #[serde(default)]
    pub glb: Option<String>,
    #[serde(default)]
    pub fbx: Option<String>,
    #[serde(default)]
    pub obj: Option<String>,
    #[serde(default)]
    pub usdz: Option<String>,
}

impl ModelUrls {
    /// URL for `format`, ignoring empty strings.
    pub fn get(&self, format: ArtifactFormat) -> Option<&str> {
        let url = match format {
            ArtifactFormat::Glb => &self.glb,
            ArtifactFormat::Fbx => &self.fbx,
            ArtifactFormat::Obj => &self.obj,
            ArtifactFormat::Usdz => &self.usdz,
        };
        url.as_deref().filter(|u| !u.is_empty())
    }
}

/// Result of one status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub status: RemoteStatus,
    /// Completion percentage (0-100).
    pub progress: u8,
    pub model_urls: ModelUrls,
    /// Service-reported error message, or the transport error for
    /// [`RemoteStatus::Error`].
    pub error: Option<String>,
}

impl TaskSnapshot {
    /// Snapshot for a query that never reached the service.
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            status: RemoteStatus::Error,
            progress: 0,
            model_urls: ModelUrls::default(),
            error: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner trait
// ---------------------------------------------------------------------------

/// Errors surfaced across the runner boundary.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Network, DNS, TLS or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("service error ({status}): {body}")]
    Service { status: u16, body: String },

    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Local filesystem failure while writing an artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An external asynchronous job runner with submit/poll/fetch operations.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Submit one stage and return the remote task id.
    async fn submit(&self, request: &StageRequest) -> Result<String, RunnerError>;

    /// Query a task. Transport failures come back as [`RemoteStatus::Error`].
    async fn query(&self, remote_id: &str) -> TaskSnapshot;

    /// Download `url` to `destination`, returning the number of bytes written.
    ///
    /// On failure no file is left at `destination`.
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, RunnerError>;
}
