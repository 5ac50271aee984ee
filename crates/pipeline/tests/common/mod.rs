//! Shared fixtures for pipeline integration tests.
//!
//! [`FakeRunner`] is an in-memory [`JobRunner`] that records every call in
//! order. Task ids are derived from the item name (`p-<name>` for previews,
//! `r-<name>` for refines); test items use their name as the prompt so the
//! fake can tell which item a preview request belongs to.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshforge_core::job::StageKind;
use meshforge_core::runner::{
    JobRunner, ModelUrls, RemoteStatus, RunnerError, StageRequest, TaskSnapshot,
};
use meshforge_core::work_item::{GenerationParams, WorkItem};
use meshforge_pipeline::config::{PipelineConfig, PollerConfig};
use meshforge_pipeline::ledger::LedgerStore;

/// One recorded call against the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit(StageKind, String),
    Query(String),
    Fetch(String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    /// remote id → statuses to report, in order; the last one repeats.
    scripts: HashMap<String, VecDeque<RemoteStatus>>,
    /// remote id → item name, for every id this fake handed out.
    issued: HashMap<String, String>,
    failing_submits: HashSet<(StageKind, String)>,
    /// Names whose succeeded refine carries no artifact URL.
    refine_without_urls: HashSet<String>,
    failing_fetches: HashSet<String>,
}

#[derive(Default)]
pub struct FakeRunner {
    state: Mutex<State>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `statuses` (in order, last repeating) for `remote_id`.
    ///
    /// Ids without a script report `SUCCEEDED` if this fake issued them and
    /// `ERROR` otherwise.
    pub fn script(&self, remote_id: &str, statuses: &[RemoteStatus]) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(remote_id.to_string(), statuses.iter().copied().collect());
    }

    /// Pretend a previous run was issued `remote_id` for `name`.
    pub fn known_task(&self, remote_id: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .issued
            .insert(remote_id.to_string(), name.to_string());
    }

    pub fn fail_submit(&self, stage: StageKind, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_submits
            .insert((stage, name.to_string()));
    }

    pub fn refine_without_urls(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .refine_without_urls
            .insert(name.to_string());
    }

    pub fn fail_fetch(&self, url: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_fetches
            .insert(url.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn submits(&self) -> Vec<(StageKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit(stage, name) => Some((stage, name)),
                _ => None,
            })
            .collect()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Fetch(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn queries_of(&self, remote_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Query(id) if id == remote_id))
            .count()
    }
}

pub fn artifact_url(remote_id: &str) -> String {
    format!("https://assets.test/{remote_id}.glb")
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn submit(&self, request: &StageRequest) -> Result<String, RunnerError> {
        let mut state = self.state.lock().unwrap();
        let (stage, name) = match request {
            StageRequest::Preview(params) => (StageKind::Preview, params.prompt.clone()),
            StageRequest::Refine {
                preview_task_id, ..
            } => {
                let name = state
                    .issued
                    .get(preview_task_id)
                    .cloned()
                    .ok_or_else(|| RunnerError::Service {
                        status: 400,
                        body: format!("unknown preview task {preview_task_id}"),
                    })?;
                (StageKind::Refine, name)
            }
        };
        state.calls.push(Call::Submit(stage, name.clone()));

        if state.failing_submits.contains(&(stage, name.clone())) {
            return Err(RunnerError::Service {
                status: 429,
                body: "rate limited".to_string(),
            });
        }

        let prefix = match stage {
            StageKind::Preview => "p",
            StageKind::Refine => "r",
        };
        let id = format!("{prefix}-{name}");
        state.issued.insert(id.clone(), name);
        Ok(id)
    }

    async fn query(&self, remote_id: &str) -> TaskSnapshot {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.calls.push(Call::Query(remote_id.to_string()));

        let status = match state.scripts.get_mut(remote_id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(RemoteStatus::Error),
            Some(script) => script.front().copied().unwrap_or(RemoteStatus::Error),
            None if state.issued.contains_key(remote_id) => RemoteStatus::Succeeded,
            None => RemoteStatus::Error,
        };

        let name = state.issued.get(remote_id).cloned().unwrap_or_default();
        let without_urls =
            remote_id.starts_with("r-") && state.refine_without_urls.contains(&name);

        TaskSnapshot {
            status,
            progress: if status == RemoteStatus::Succeeded { 100 } else { 40 },
            model_urls: if status == RemoteStatus::Succeeded && !without_urls {
                ModelUrls {
                    glb: Some(artifact_url(remote_id)),
                    ..ModelUrls::default()
                }
            } else {
                ModelUrls::default()
            },
            error: match status {
                RemoteStatus::Failed => Some("generation failed".to_string()),
                RemoteStatus::Error => Some("unknown task".to_string()),
                _ => None,
            },
        }
    }

    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, RunnerError> {
        let failing = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Fetch(url.to_string()));
            state.failing_fetches.contains(url)
        };
        if failing {
            return Err(RunnerError::Service {
                status: 404,
                body: "not found".to_string(),
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, url.as_bytes()).await?;
        Ok(url.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A work item whose prompt is its name.
pub fn item(name: &str) -> WorkItem {
    WorkItem {
        name: name.to_string(),
        output_dir: "Models/Test".to_string(),
        filename: format!("{name}.glb"),
        request: GenerationParams {
            prompt: name.to_string(),
            negative_prompt: String::new(),
            target_polycount: 5000,
            art_style: "realistic".to_string(),
            topology: "triangle".to_string(),
            should_remesh: true,
            enable_pbr: true,
        },
    }
}

pub fn items(names: &[&str]) -> Vec<WorkItem> {
    names.iter().map(|n| item(n)).collect()
}

/// Fast polling, no submit delay, assets under `root`.
pub fn fast_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        assets_root: root.join("Assets"),
        poller: PollerConfig {
            interval: Duration::from_millis(10),
            max_poll_time: Duration::from_secs(2),
            concurrency: 4,
        },
        submit_delay: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn store(root: &Path) -> LedgerStore {
    LedgerStore::new(root.join("state.json")).with_retry(1, Duration::from_millis(1))
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

/// Shared buffer that collects formatted log lines.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route INFO-and-above events on the current thread into a buffer until the
/// guard is dropped.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
