//! Per-stage job record.
//!
//! A [`JobHandle`] tracks one remote task for one work item at one stage.
//! It starts out [`JobStatus::Pending`] and is resolved exactly once, by the
//! batch poller, to a terminal status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runner::TaskSnapshot;

/// Pipeline stage of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preview,
    Refine,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Refine => "refine",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local view of a job's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
    /// The service reported failure/cancel/expiry, or the query failed.
    Failed,
    /// Still pending when the poll deadline elapsed.
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        }
    }
}

/// One outstanding or completed remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub stage: StageKind,
    pub remote_id: String,
    status: JobStatus,
    /// Present only when `status` is `Succeeded`.
    payload: Option<TaskSnapshot>,
    /// Diagnostic text for `Failed` / `TimedOut`.
    failure: Option<String>,
}

impl JobHandle {
    pub fn new(name: impl Into<String>, stage: StageKind, remote_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage,
            remote_id: remote_id.into(),
            status: JobStatus::Pending,
            payload: None,
            failure: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&TaskSnapshot> {
        self.payload.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// Record a successful terminal snapshot. Returns `false` (and changes
    /// nothing) if the handle was already terminal.
    pub fn succeed(&mut self, snapshot: TaskSnapshot) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Succeeded;
        self.payload = Some(snapshot);
        true
    }

    /// Record a terminal failure. No-op if already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.resolve_unsuccessful(JobStatus::Failed, reason.into())
    }

    /// Record a poll deadline expiry. No-op if already terminal.
    pub fn time_out(&mut self, reason: impl Into<String>) -> bool {
        self.resolve_unsuccessful(JobStatus::TimedOut, reason.into())
    }

    fn resolve_unsuccessful(&mut self, status: JobStatus, reason: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.failure = Some(reason);
        true
    }
}
