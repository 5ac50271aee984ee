//! [`JobRunner`] implementation backed by the Meshy REST API.
//!
//! Converts API errors into the runner-level taxonomy: transport failures
//! and non-success responses from the status endpoint become
//! [`RemoteStatus::Error`](meshforge_core::runner::RemoteStatus::Error)
//! snapshots instead of errors, so the poller never has to special-case
//! them.

use std::path::Path;

use async_trait::async_trait;
use meshforge_core::runner::{JobRunner, RunnerError, StageRequest, TaskSnapshot};

use crate::api::{MeshyApi, MeshyApiError};

impl From<MeshyApiError> for RunnerError {
    fn from(e: MeshyApiError) -> Self {
        match e {
            MeshyApiError::Request(e) if e.is_decode() => RunnerError::Protocol(e.to_string()),
            MeshyApiError::Request(e) => RunnerError::Transport(e.to_string()),
            MeshyApiError::ApiError { status, body } => RunnerError::Service { status, body },
            MeshyApiError::MissingTaskId => {
                RunnerError::Protocol("response did not include a task id".to_string())
            }
            MeshyApiError::Io(e) => RunnerError::Io(e),
        }
    }
}

#[async_trait]
impl JobRunner for MeshyApi {
    async fn submit(&self, request: &StageRequest) -> Result<String, RunnerError> {
        let task_id = self.create_task(request).await.map_err(|e| {
            tracing::warn!(stage = %request.stage(), error = %e, "Task submission failed");
            RunnerError::from(e)
        })?;
        tracing::debug!(stage = %request.stage(), task_id = %task_id, "Task created");
        Ok(task_id)
    }

    async fn query(&self, remote_id: &str) -> TaskSnapshot {
        match self.get_task(remote_id).await {
            Ok(task) => task.into_snapshot(),
            Err(e) => {
                tracing::debug!(remote_id, error = %e, "Task query failed");
                TaskSnapshot::transport_error(e.to_string())
            }
        }
    }

    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, RunnerError> {
        Ok(self.download(url, destination).await?)
    }
}
