//! Tunables for a pipeline run.

use std::path::PathBuf;
use std::time::Duration;

use meshforge_core::runner::ArtifactFormat;

use crate::error::PipelineError;

/// Delay between poll sweeps while jobs remain pending.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Wall-clock budget for polling one stage.
pub const DEFAULT_MAX_POLL_TIME: Duration = Duration::from_secs(600);

/// Courtesy pause after each submission call.
pub const DEFAULT_SUBMIT_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_SUBMIT_CONCURRENCY: usize = 1;
pub const DEFAULT_POLL_CONCURRENCY: usize = 8;
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// Number of attempts for each ledger save before the run aborts.
pub const DEFAULT_LEDGER_SAVE_ATTEMPTS: u32 = 3;

pub const DEFAULT_LEDGER_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Upper bound on the per-stage poll budget (and therefore the interval).
pub const MAX_POLL_TIME_LIMIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Polling cadence and deadline for the batch poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_poll_time: Duration,
    /// Maximum status queries in flight within one sweep.
    pub concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_poll_time: DEFAULT_MAX_POLL_TIME,
            concurrency: DEFAULT_POLL_CONCURRENCY,
        }
    }
}

/// Everything the orchestrator needs besides the runner and the items.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory that work-item output paths are relative to.
    pub assets_root: PathBuf,
    pub poller: PollerConfig,
    pub submit_delay: Duration,
    pub submit_concurrency: usize,
    pub download_concurrency: usize,
    pub artifact_format: ArtifactFormat,
    pub ledger_save_attempts: u32,
    pub ledger_retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assets_root: PathBuf::from("Assets"),
            poller: PollerConfig::default(),
            submit_delay: DEFAULT_SUBMIT_DELAY,
            submit_concurrency: DEFAULT_SUBMIT_CONCURRENCY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            artifact_format: ArtifactFormat::default(),
            ledger_save_attempts: DEFAULT_LEDGER_SAVE_ATTEMPTS,
            ledger_retry_delay: DEFAULT_LEDGER_RETRY_DELAY,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.poller.interval.is_zero() {
            return Err(PipelineError::Config("poll interval must be non-zero".into()));
        }
        if self.poller.max_poll_time > MAX_POLL_TIME_LIMIT {
            return Err(PipelineError::Config(format!(
                "max poll time ({:?}) exceeds the limit of {:?}",
                self.poller.max_poll_time, MAX_POLL_TIME_LIMIT
            )));
        }
        if self.poller.max_poll_time < self.poller.interval {
            return Err(PipelineError::Config(format!(
                "max poll time ({:?}) is shorter than the poll interval ({:?})",
                self.poller.max_poll_time, self.poller.interval
            )));
        }
        if self.poller.concurrency == 0
            || self.submit_concurrency == 0
            || self.download_concurrency == 0
        {
            return Err(PipelineError::Config(
                "concurrency limits must be at least 1".into(),
            ));
        }
        if self.ledger_save_attempts == 0 {
            return Err(PipelineError::Config(
                "ledger_save_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
