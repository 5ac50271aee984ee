//! Batch poller: drive a stage's jobs to a terminal state.
//!
//! Each sweep issues exactly one status query per still-pending job
//! (concurrently, bounded by [`PollerConfig::concurrency`]). Jobs that reach
//! a terminal status are resolved and never queried again. Between sweeps
//! the poller sleeps the configured interval; once the wall-clock deadline
//! measured from the start of [`BatchPoller::poll`] passes, every job still
//! pending is resolved as timed out.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use meshforge_core::job::{JobHandle, JobStatus, StageKind};
use meshforge_core::runner::{JobRunner, RemoteStatus, TaskSnapshot};
use tokio::time::Instant;

use crate::config::PollerConfig;

/// Number of pending jobs named in each "waiting" log line.
const WAITING_PREVIEW_LEN: usize = 5;

/// Stand-in for "never" when a duration does not fit after `now`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + duration`, saturating instead of panicking on overflow.
fn instant_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Outcome of polling one stage: every submitted handle, resolved.
#[derive(Debug, Default)]
pub struct PollReport {
    handles: BTreeMap<String, JobHandle>,
}

impl PollReport {
    pub fn get(&self, name: &str) -> Option<&JobHandle> {
        self.handles.get(name)
    }

    /// The succeeded handle for `name`, if any.
    pub fn succeeded(&self, name: &str) -> Option<&JobHandle> {
        self.get(name).filter(|h| h.is_succeeded())
    }

    pub fn handles(&self) -> impl Iterator<Item = &JobHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.handles.values().filter(|h| h.status() == status).count()
    }
}

/// Polls a batch of jobs against a [`JobRunner`].
pub struct BatchPoller<'a, R: JobRunner + ?Sized> {
    runner: &'a R,
    config: &'a PollerConfig,
}

impl<'a, R: JobRunner + ?Sized> BatchPoller<'a, R> {
    pub fn new(runner: &'a R, config: &'a PollerConfig) -> Self {
        Self { runner, config }
    }

    /// Poll `handles` until all are terminal or the deadline elapses.
    ///
    /// Handles passed in already terminal are returned unchanged and never
    /// queried. If two handles share a name the later one wins.
    pub async fn poll(&self, stage: StageKind, handles: Vec<JobHandle>) -> PollReport {
        let deadline = instant_after(Instant::now(), self.config.max_poll_time);
        let mut report = PollReport::default();
        let mut pending: BTreeMap<String, JobHandle> = BTreeMap::new();
        let mut progress: HashMap<String, u8> = HashMap::new();

        for handle in handles {
            if handle.status().is_terminal() {
                report.handles.insert(handle.name.clone(), handle);
            } else {
                pending.insert(handle.name.clone(), handle);
            }
        }

        let mut sweep = 0u32;
        while !pending.is_empty() {
            sweep += 1;
            let snapshots = self.sweep(&pending, deadline).await;

            for (name, snapshot) in snapshots {
                let Some(mut handle) = pending.remove(&name) else {
                    continue;
                };
                if Self::apply(stage, &mut handle, snapshot, &mut progress) {
                    report.handles.insert(name, handle);
                } else {
                    pending.insert(name, handle);
                }
            }

            if pending.is_empty() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            Self::log_waiting(stage, sweep, &pending, &progress);
            tokio::time::sleep_until(instant_after(now, self.config.interval).min(deadline)).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        for (name, mut handle) in pending {
            let last = progress.get(&name).copied().unwrap_or(0);
            tracing::warn!(
                stage = %stage,
                name = %name,
                remote_id = %handle.remote_id,
                progress = last,
                "TIMEOUT",
            );
            handle.time_out(format!(
                "still running at {last}% after {:?}",
                self.config.max_poll_time
            ));
            report.handles.insert(name, handle);
        }

        tracing::info!(
            stage = %stage,
            succeeded = report.count(JobStatus::Succeeded),
            failed = report.count(JobStatus::Failed),
            timed_out = report.count(JobStatus::TimedOut),
            sweeps = sweep,
            "Polling finished",
        );

        report
    }

    /// Query every pending job once. Results arriving after `deadline` are
    /// dropped and the affected jobs stay pending.
    async fn sweep(
        &self,
        pending: &BTreeMap<String, JobHandle>,
        deadline: Instant,
    ) -> Vec<(String, TaskSnapshot)> {
        let runner = self.runner;
        let mut queries = stream::iter(pending.values())
            .map(|handle| async move {
                let snapshot = runner.query(&handle.remote_id).await;
                (handle.name.clone(), snapshot)
            })
            .buffer_unordered(self.config.concurrency);

        let mut snapshots = Vec::with_capacity(pending.len());
        loop {
            match tokio::time::timeout_at(deadline, queries.next()).await {
                Ok(Some(result)) => snapshots.push(result),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        answered = snapshots.len(),
                        outstanding = pending.len() - snapshots.len(),
                        "Poll deadline reached mid-sweep",
                    );
                    break;
                }
            }
        }
        snapshots
    }

    /// Fold one snapshot into its handle. Returns `true` if the handle is
    /// now terminal.
    fn apply(
        stage: StageKind,
        handle: &mut JobHandle,
        snapshot: TaskSnapshot,
        progress: &mut HashMap<String, u8>,
    ) -> bool {
        match snapshot.status {
            RemoteStatus::Succeeded => {
                tracing::info!(stage = %stage, name = %handle.name, "DONE");
                handle.succeed(snapshot);
                true
            }
            status if status.is_failure() => {
                let detail = snapshot.error.unwrap_or_default();
                tracing::warn!(
                    stage = %stage,
                    name = %handle.name,
                    remote_id = %handle.remote_id,
                    status = %status,
                    error = %detail,
                    "Job failed",
                );
                handle.fail(if detail.is_empty() {
                    status.to_string()
                } else {
                    format!("{status}: {detail}")
                });
                true
            }
            _ => {
                progress.insert(handle.name.clone(), snapshot.progress);
                false
            }
        }
    }

    fn log_waiting(
        stage: StageKind,
        sweep: u32,
        pending: &BTreeMap<String, JobHandle>,
        progress: &HashMap<String, u8>,
    ) {
        let shown: Vec<String> = pending
            .keys()
            .take(WAITING_PREVIEW_LEN)
            .map(|name| match progress.get(name) {
                Some(p) => format!("{name}({p}%)"),
                None => format!("{name}(?%)"),
            })
            .collect();
        let extra = pending.len().saturating_sub(WAITING_PREVIEW_LEN);
        let suffix = if extra > 0 {
            format!(" +{extra} more")
        } else {
            String::new()
        };
        tracing::info!(
            stage = %stage,
            sweep,
            pending = pending.len(),
            "Waiting: {}{}",
            shown.join(", "),
            suffix,
        );
    }
}
