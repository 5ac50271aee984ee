//! Stage orchestrator.
//!
//! Runs a batch through five phases with a hard barrier between them:
//!
//! 1. submit a preview task for every item that still needs work,
//! 2. poll every preview task to a terminal state,
//! 3. submit a refine task for every succeeded preview,
//! 4. poll every refine task to a terminal state,
//! 5. download the best available artifact for every item.
//!
//! Work inside a phase fans out concurrently; the next phase only starts
//! once every item has a terminal result for the current one. The ledger is
//! owned by the orchestrator task and saved after every mutation.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use meshforge_core::job::{JobHandle, StageKind};
use meshforge_core::runner::{JobRunner, RemoteStatus, RunnerError, StageRequest, TaskSnapshot};
use meshforge_core::work_item::{validate_batch, WorkItem};
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ledger::{Ledger, LedgerStore};
use crate::poller::{BatchPoller, PollReport};
use crate::summary::{FailurePhase, RunSummary};

/// Drives a batch of [`WorkItem`]s through the generation pipeline.
pub struct Orchestrator<R: JobRunner + ?Sized> {
    runner: Arc<R>,
    items: Vec<WorkItem>,
    store: LedgerStore,
    config: PipelineConfig,
}

/// Result of the submit step for one item.
enum Submission {
    /// A new task was created.
    Submitted(String),
    /// A ledger-recorded task re-validated as succeeded.
    Reused(String, TaskSnapshot),
    /// A ledger-recorded task is still running; keep polling it.
    Resumed(String),
    Failed(RunnerError),
}

impl<R: JobRunner + ?Sized> Orchestrator<R> {
    /// Build an orchestrator over an ordered, immutable batch.
    ///
    /// Rejects an invalid config and batches whose items share a name or an
    /// output path.
    pub fn new(
        runner: Arc<R>,
        items: Vec<WorkItem>,
        store: LedgerStore,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        validate_batch(&items).map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            runner,
            items,
            store,
            config,
        })
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    /// Run every phase for the whole batch.
    ///
    /// Per-item failures are reported in the returned [`RunSummary`]; only
    /// ledger persistence failures abort the run.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let run_id = uuid::Uuid::new_v4();
        self.run_phases()
            .instrument(tracing::info_span!("run", %run_id))
            .await
    }

    async fn run_phases(&self) -> Result<RunSummary, PipelineError> {
        tracing::info!(total = self.items.len(), "Starting batch generation");

        let mut ledger = self.store.load().await?;
        self.ensure_output_dirs().await;

        let to_process = self.filter_pending(&ledger).await;
        let mut summary = RunSummary::new(self.items.len(), self.items.len() - to_process.len());

        if to_process.is_empty() {
            tracing::info!("All assets already generated");
            summary.log();
            return Ok(summary);
        }
        tracing::info!(count = to_process.len(), "Assets to generate");

        // ── Phase 1: submit previews ──
        tracing::info!("--- PHASE 1: Submitting preview tasks ---");
        let preview_requests = to_process
            .iter()
            .map(|item| (*item, StageRequest::Preview(item.request.clone())))
            .collect();
        let (preview_handles, preview_submit_errors) = self
            .submit_stage(StageKind::Preview, preview_requests, &mut ledger, &mut summary)
            .await?;

        // ── Phase 2: poll previews ──
        tracing::info!(
            count = preview_handles.len(),
            "--- PHASE 2: Polling preview tasks ---"
        );
        let preview_report = self.poll_stage(StageKind::Preview, preview_handles).await;

        // ── Phase 3: submit refines ──
        tracing::info!("--- PHASE 3: Submitting refine tasks ---");
        let mut refine_requests = Vec::new();
        for item in &to_process {
            match preview_report.succeeded(&item.name) {
                Some(preview) => refine_requests.push((
                    *item,
                    StageRequest::Refine {
                        preview_task_id: preview.remote_id.clone(),
                        enable_pbr: item.request.enable_pbr,
                    },
                )),
                None => tracing::info!(name = %item.name, "Skipping refine (preview failed)"),
            }
        }
        let (refine_handles, _) = self
            .submit_stage(StageKind::Refine, refine_requests, &mut ledger, &mut summary)
            .await?;

        // ── Phase 4: poll refines ──
        let refine_report = if refine_handles.is_empty() {
            PollReport::default()
        } else {
            tracing::info!(
                count = refine_handles.len(),
                "--- PHASE 4: Polling refine tasks ---"
            );
            self.poll_stage(StageKind::Refine, refine_handles).await
        };

        // ── Phase 5: download ──
        tracing::info!("--- PHASE 5: Downloading models ---");
        let mut downloads = Vec::new();
        for item in &to_process {
            match self.resolve_artifact(item, &preview_report, &refine_report) {
                Ok(url) => downloads.push((*item, url)),
                Err((phase, reason)) => {
                    let reason = match phase {
                        FailurePhase::PreviewSubmit => preview_submit_errors
                            .get(&item.name)
                            .cloned()
                            .unwrap_or(reason),
                        _ => reason,
                    };
                    tracing::warn!(name = %item.name, phase = %phase, "NO model URL available");
                    summary.record_failure(&item.name, phase, reason);
                }
            }
        }
        self.download_all(downloads, &mut ledger, &mut summary)
            .await?;

        summary.log();
        Ok(summary)
    }

    // ---------------------------------------------------------------------
    // Filter
    // ---------------------------------------------------------------------

    /// Items that are not both marked completed and present on disk.
    async fn filter_pending(&self, ledger: &Ledger) -> Vec<&WorkItem> {
        let mut to_process = Vec::new();
        for item in &self.items {
            let destination = self.destination(item);
            let on_disk = tokio::fs::try_exists(&destination).await.unwrap_or(false);
            match (ledger.is_completed(&item.name), on_disk) {
                (true, true) => tracing::info!(name = %item.name, "SKIP (done)"),
                (true, false) => {
                    tracing::info!(
                        name = %item.name,
                        path = %destination.display(),
                        "Marked completed but output is missing, regenerating",
                    );
                    to_process.push(item);
                }
                _ => to_process.push(item),
            }
        }
        to_process
    }

    async fn ensure_output_dirs(&self) {
        let dirs: BTreeSet<PathBuf> = self
            .items
            .iter()
            .map(|item| self.config.assets_root.join(&item.output_dir))
            .collect();
        for dir in dirs {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to create output directory");
            }
        }
    }

    fn destination(&self, item: &WorkItem) -> PathBuf {
        item.destination(&self.config.assets_root)
    }

    // ---------------------------------------------------------------------
    // Submit
    // ---------------------------------------------------------------------

    /// Submit (or reuse) one stage for every request.
    ///
    /// Returns the handles to poll and the submission error text for every
    /// item that could not be submitted. Each new task id is recorded and
    /// the ledger saved before the next result is handled.
    async fn submit_stage(
        &self,
        stage: StageKind,
        requests: Vec<(&WorkItem, StageRequest)>,
        ledger: &mut Ledger,
        summary: &mut RunSummary,
    ) -> Result<(Vec<JobHandle>, HashMap<String, String>), PipelineError> {
        let prepared: Vec<_> = requests
            .into_iter()
            .map(|(item, request)| {
                let prior = ledger.task_id(stage, &item.name).map(str::to_owned);
                (item.name.clone(), request, prior)
            })
            .collect();

        let runner = &*self.runner;
        let delay = self.config.submit_delay;
        let mut results = stream::iter(prepared)
            .map(|(name, request, prior)| async move {
                let outcome = Self::submit_one(runner, stage, &name, &request, prior, delay).await;
                (name, outcome)
            })
            .buffer_unordered(self.config.submit_concurrency);

        let mut handles = Vec::new();
        let mut errors = HashMap::new();
        while let Some((name, outcome)) = results.next().await {
            match outcome {
                Submission::Submitted(task_id) => {
                    tracing::info!(name = %name, stage = %stage, remote_id = %task_id, "Submitted");
                    ledger.record_task(stage, &name, &task_id);
                    self.store.save(ledger).await?;
                    summary.submitted += 1;
                    handles.push(JobHandle::new(name, stage, task_id));
                }
                Submission::Reused(task_id, snapshot) => {
                    tracing::info!(name = %name, stage = %stage, remote_id = %task_id, "Reusing previous task");
                    summary.reused += 1;
                    let mut handle = JobHandle::new(name, stage, task_id);
                    handle.succeed(snapshot);
                    handles.push(handle);
                }
                Submission::Resumed(task_id) => {
                    tracing::info!(name = %name, stage = %stage, remote_id = %task_id, "Resuming previous task");
                    summary.reused += 1;
                    handles.push(JobHandle::new(name, stage, task_id));
                }
                Submission::Failed(e) => {
                    let note = match stage {
                        StageKind::Preview => "",
                        StageKind::Refine => " (will use preview)",
                    };
                    tracing::warn!(name = %name, stage = %stage, error = %e, "FAILED to submit{}", note);
                    errors.insert(name, format!("{stage} submission failed: {e}"));
                }
            }
        }

        Ok((handles, errors))
    }

    /// Re-validate a ledger-recorded task, or submit a new one.
    async fn submit_one(
        runner: &R,
        stage: StageKind,
        name: &str,
        request: &StageRequest,
        prior: Option<String>,
        delay: std::time::Duration,
    ) -> Submission {
        if let Some(prior_id) = prior {
            let snapshot = runner.query(&prior_id).await;
            let status = snapshot.status;
            match status {
                RemoteStatus::Succeeded => return Submission::Reused(prior_id, snapshot),
                status if !status.is_terminal() => return Submission::Resumed(prior_id),
                status => tracing::info!(
                    name = %name,
                    stage = %stage,
                    remote_id = %prior_id,
                    status = %status,
                    "Previous task unusable, resubmitting",
                ),
            }
        }

        let outcome = match runner.submit(request).await {
            Ok(task_id) => Submission::Submitted(task_id),
            Err(e) => Submission::Failed(e),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    // ---------------------------------------------------------------------
    // Poll
    // ---------------------------------------------------------------------

    async fn poll_stage(&self, stage: StageKind, handles: Vec<JobHandle>) -> PollReport {
        BatchPoller::new(&*self.runner, &self.config.poller)
            .poll(stage, handles)
            .await
    }

    // ---------------------------------------------------------------------
    // Resolve & download
    // ---------------------------------------------------------------------

    /// Pick the refine artifact, falling back to the preview artifact.
    fn resolve_artifact(
        &self,
        item: &WorkItem,
        previews: &PollReport,
        refines: &PollReport,
    ) -> Result<String, (FailurePhase, String)> {
        let format = self.config.artifact_format;
        let url_of = |handle: &JobHandle| {
            handle
                .payload()
                .and_then(|snapshot| snapshot.model_urls.get(format))
                .map(str::to_owned)
        };

        if let Some(url) = refines.succeeded(&item.name).and_then(url_of) {
            return Ok(url);
        }

        match previews.get(&item.name) {
            None => Err((
                FailurePhase::PreviewSubmit,
                "preview was never submitted".to_string(),
            )),
            Some(preview) if !preview.is_succeeded() => Err((
                FailurePhase::PreviewPoll,
                format!(
                    "preview {}: {}",
                    preview.status().label(),
                    preview.failure().unwrap_or("no detail")
                ),
            )),
            Some(preview) => match url_of(preview) {
                Some(url) => {
                    tracing::info!(name = %item.name, "Using preview model (refine unavailable)");
                    Ok(url)
                }
                None => Err((
                    FailurePhase::NoArtifact,
                    format!("no {} URL in preview or refine result", format.as_str()),
                )),
            },
        }
    }

    /// Fetch every resolved artifact. Each success is recorded in the
    /// ledger and saved before the next result is handled.
    async fn download_all(
        &self,
        downloads: Vec<(&WorkItem, String)>,
        ledger: &mut Ledger,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let runner = &*self.runner;
        let mut results = stream::iter(downloads)
            .map(|(item, url)| {
                let destination = self.destination(item);
                async move {
                    let result = runner.fetch(&url, &destination).await;
                    (item, destination, result)
                }
            })
            .buffer_unordered(self.config.download_concurrency);

        while let Some((item, destination, result)) = results.next().await {
            match result {
                Ok(bytes) => {
                    tracing::info!(
                        name = %item.name,
                        path = %destination.display(),
                        "Downloaded: {} ({:.1} KB)",
                        item.filename,
                        bytes as f64 / 1024.0,
                    );
                    ledger.mark_completed(&item.name);
                    self.store.save(ledger).await?;
                    summary.succeeded.push(item.name.clone());
                }
                Err(e) => {
                    tracing::warn!(name = %item.name, error = %e, "Download failed");
                    summary.record_failure(&item.name, FailurePhase::Download, e.to_string());
                }
            }
        }
        Ok(())
    }
}
