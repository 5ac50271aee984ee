//! End-of-run tally.

use std::fmt;

use serde::Serialize;

/// Where an item's processing ended without an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// The preview task could not be submitted.
    PreviewSubmit,
    /// The preview task failed remotely or timed out.
    PreviewPoll,
    /// Both stages finished without a usable artifact URL.
    NoArtifact,
    /// The artifact could not be downloaded.
    Download,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreviewSubmit => "preview submit",
            Self::PreviewPoll => "preview poll",
            Self::NoArtifact => "no artifact",
            Self::Download => "download",
        })
    }
}

/// One item that ended the run without a downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub name: String,
    pub phase: FailurePhase,
    pub reason: String,
}

/// Counts and failures for a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Items in the batch.
    pub total: usize,
    /// Items skipped because they were already completed on disk.
    pub already_done: usize,
    /// Items downloaded in this run, in completion order.
    pub succeeded: Vec<String>,
    pub failures: Vec<ItemFailure>,
    /// New remote tasks created (both stages).
    pub submitted: usize,
    /// Ledger-recorded tasks reused instead of resubmitted (both stages).
    pub reused: usize,
}

impl RunSummary {
    pub fn new(total: usize, already_done: usize) -> Self {
        Self {
            total,
            already_done,
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, name: &str, phase: FailurePhase, reason: impl Into<String>) {
        self.failures.push(ItemFailure {
            name: name.to_string(),
            phase,
            reason: reason.into(),
        });
    }

    /// `true` iff every item that needed work ended with an artifact.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit code: 0 on success, 1 if any item failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Emit the final report.
    pub fn log(&self) {
        tracing::info!(
            succeeded = self.succeeded.len(),
            failed = self.failures.len(),
            submitted = self.submitted,
            reused = self.reused,
            "DONE: {} succeeded, {} failed",
            self.succeeded.len(),
            self.failures.len(),
        );
        if self.already_done > 0 {
            tracing::info!("({} were already completed)", self.already_done);
        }
        for failure in &self.failures {
            tracing::warn!(
                name = %failure.name,
                phase = %failure.phase,
                reason = %failure.reason,
                "Item failed",
            );
        }
    }
}
