use crate::ledger::LedgerError;

/// Errors that abort a pipeline run.
///
/// Per-item failures never appear here; they are recorded in the
/// [`RunSummary`](crate::summary::RunSummary).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    Config(String),

    #[error("Ledger persistence failed: {0}")]
    Ledger(#[from] LedgerError),
}
