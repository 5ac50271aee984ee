//! Meshy text-to-3D request and response bodies.
//!
//! Both stages are submitted to the same endpoint and distinguished by the
//! `mode` field. Task objects returned by the status endpoint are decoded
//! into [`TaskResponse`] and converted into the runner-level
//! [`TaskSnapshot`].

use meshforge_core::runner::{ModelUrls, RemoteStatus, StageRequest, TaskSnapshot};
use serde::{Deserialize, Serialize};

/// Body for `POST /text-to-3d`, tagged by `mode`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CreateTaskBody<'a> {
    Preview {
        prompt: &'a str,
        negative_prompt: &'a str,
        art_style: &'a str,
        target_polycount: u32,
        topology: &'a str,
        should_remesh: bool,
    },
    Refine {
        preview_task_id: &'a str,
        enable_pbr: bool,
    },
}

impl<'a> From<&'a StageRequest> for CreateTaskBody<'a> {
    fn from(request: &'a StageRequest) -> Self {
        match request {
            StageRequest::Preview(params) => Self::Preview {
                prompt: &params.prompt,
                negative_prompt: &params.negative_prompt,
                art_style: &params.art_style,
                target_polycount: params.target_polycount,
                topology: &params.topology,
                should_remesh: params.should_remesh,
            },
            StageRequest::Refine {
                preview_task_id,
                enable_pbr,
            } => Self::Refine {
                preview_task_id,
                enable_pbr: *enable_pbr,
            },
        }
    }
}

/// Response returned by `POST /text-to-3d`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskResponse {
    /// Server-assigned task identifier.
    pub result: Option<String>,
}

/// Error object attached to a failed task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskError {
    #[serde(default)]
    pub message: String,
}

/// Task object returned by `GET /text-to-3d/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default = "unknown_status")]
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub model_urls: Option<ModelUrls>,
    #[serde(default)]
    pub task_error: Option<TaskError>,
}

fn unknown_status() -> RemoteStatus {
    RemoteStatus::Unknown
}

impl TaskResponse {
    pub fn into_snapshot(self) -> TaskSnapshot {
        let error = self
            .task_error
            .map(|e| e.message)
            .filter(|m| !m.is_empty());
        TaskSnapshot {
            status: self.status,
            progress: self.progress.min(100),
            model_urls: self.model_urls.unwrap_or_default(),
            error,
        }
    }
}

/// Parse a task object.
pub fn parse_task(text: &str) -> Result<TaskResponse, serde_json::Error> {
    serde_json::from_str(text)
}
