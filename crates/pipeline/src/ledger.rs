//! Durable record of submissions and completions.
//!
//! The ledger is a small JSON document with three fields: the set of
//! completed item names, and one name → task id map per stage. It is loaded
//! once at the start of a run and overwritten after every mutation.
//!
//! A recorded task id only says "this was submitted"; callers must
//! re-validate it with a status query before trusting it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use meshforge_core::job::StageKind;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::config::{DEFAULT_LEDGER_RETRY_DELAY, DEFAULT_LEDGER_SAVE_ATTEMPTS};

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// Persisted run state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// Names whose artifact has been written to disk.
    #[serde(default)]
    pub completed: BTreeSet<String>,
    /// name → preview task id
    #[serde(default)]
    pub preview_tasks: BTreeMap<String, String>,
    /// name → refine task id
    #[serde(default)]
    pub refine_tasks: BTreeMap<String, String>,
}

impl Ledger {
    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    /// Record that `name`'s artifact is on disk. Returns `false` if it already was.
    pub fn mark_completed(&mut self, name: &str) -> bool {
        self.completed.insert(name.to_string())
    }

    pub fn task_id(&self, stage: StageKind, name: &str) -> Option<&str> {
        self.tasks(stage).get(name).map(String::as_str)
    }

    /// Record (or replace) the task id submitted for `name` at `stage`.
    pub fn record_task(&mut self, stage: StageKind, name: &str, task_id: &str) {
        let tasks = match stage {
            StageKind::Preview => &mut self.preview_tasks,
            StageKind::Refine => &mut self.refine_tasks,
        };
        tasks.insert(name.to_string(), task_id.to_string());
    }

    fn tasks(&self, stage: StageKind) -> &BTreeMap<String, String> {
        match stage {
            StageKind::Preview => &self.preview_tasks,
            StageKind::Refine => &self.refine_tasks,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Errors reading or writing the ledger file.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("ledger {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write ledger {path} after {attempts} attempt(s): {source}")]
    Write {
        path: PathBuf,
        attempts: u32,
        source: std::io::Error,
    },

    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Loads and saves a [`Ledger`] at a fixed path.
///
/// Saves write a sibling temp file and rename it over the target, so the
/// file on disk is always either the previous or the new version. Each save
/// is retried a bounded number of times; exhausting the retries is fatal to
/// the run.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
    attempts: u32,
    retry_delay: Duration,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            attempts: DEFAULT_LEDGER_SAVE_ATTEMPTS,
            retry_delay: DEFAULT_LEDGER_RETRY_DELAY,
        }
    }

    /// Override the save retry policy. `attempts` is clamped to at least 1.
    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger, or an empty one if the file does not exist.
    ///
    /// A file that exists but cannot be parsed is an error; it is never
    /// silently replaced.
    pub async fn load(&self) -> Result<Ledger, LedgerError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No ledger found, starting fresh");
                return Ok(Ledger::default());
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let ledger: Ledger = serde_json::from_str(&text).map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(
            path = %self.path.display(),
            completed = ledger.completed.len(),
            preview_tasks = ledger.preview_tasks.len(),
            refine_tasks = ledger.refine_tasks.len(),
            "Ledger loaded",
        );
        Ok(ledger)
    }

    /// Overwrite the ledger file with `ledger`, retrying transient failures.
    pub async fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(ledger)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_once(json.as_bytes()).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= self.attempts => {
                    tracing::error!(
                        path = %self.path.display(),
                        attempt,
                        error = %source,
                        "Ledger save failed, giving up",
                    );
                    return Err(LedgerError::Write {
                        path: self.path.clone(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "Ledger save failed, retrying",
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn write_once(&self, bytes: &[u8]) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.tmp_path();
        if let Err(e) = Self::write_durably(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Write `bytes` to `path` and fsync before returning.
    async fn write_durably(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn record_and_lookup_per_stage() {
        let mut ledger = Ledger::default();
        ledger.record_task(StageKind::Preview, "goblin", "p-1");
        ledger.record_task(StageKind::Refine, "goblin", "r-1");

        assert_eq!(ledger.task_id(StageKind::Preview, "goblin"), Some("p-1"));
        assert_eq!(ledger.task_id(StageKind::Refine, "goblin"), Some("r-1"));
        assert_eq!(ledger.task_id(StageKind::Preview, "skeleton"), None);
    }

    #[test]
    fn record_replaces_previous_id() {
        let mut ledger = Ledger::default();
        ledger.record_task(StageKind::Preview, "goblin", "p-1");
        ledger.record_task(StageKind::Preview, "goblin", "p-2");
        assert_eq!(ledger.task_id(StageKind::Preview, "goblin"), Some("p-2"));
    }

    #[test]
    fn mark_completed_is_idempotent() {
        let mut ledger = Ledger::default();
        assert!(ledger.mark_completed("goblin"));
        assert!(!ledger.mark_completed("goblin"));
        assert!(ledger.is_completed("goblin"));
    }

    #[test]
    fn reads_legacy_file_with_missing_fields() {
        let ledger: Ledger = serde_json::from_str(r#"{"completed": ["goblin"]}"#).unwrap();
        assert!(ledger.is_completed("goblin"));
        assert!(ledger.preview_tasks.is_empty());
        assert!(ledger.refine_tasks.is_empty());
    }

    #[test]
    fn serialized_shape_has_three_fields() {
        let mut ledger = Ledger::default();
        ledger.mark_completed("rock");
        ledger.record_task(StageKind::Preview, "rock", "p-9");
        let value = serde_json::to_value(&ledger).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(value["completed"], serde_json::json!(["rock"]));
        assert_eq!(value["preview_tasks"]["rock"], "p-9");
        assert!(value["refine_tasks"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().await.unwrap(), Ledger::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("tools/.generation_state.json"));
        let mut ledger = Ledger::default();
        ledger.mark_completed("goblin");
        ledger.record_task(StageKind::Refine, "goblin", "r-7");

        store.save(&ledger).await.unwrap();

        assert_eq!(store.load().await.unwrap(), ledger);
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn save_overwrites_rather_than_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("state.json"));
        let mut ledger = Ledger::default();
        ledger.mark_completed("a");
        store.save(&ledger).await.unwrap();
        ledger.completed.clear();
        ledger.mark_completed("b");
        store.save(&ledger).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(!loaded.is_completed("a"));
        assert!(loaded.is_completed("b"));
    }

    #[tokio::test]
    async fn write_durably_leaves_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.tmp");

        LedgerStore::write_durably(&path, b"{\"completed\":[]}").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"{\"completed\":[]}");
    }

    #[tokio::test]
    async fn failed_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the ledger file should go makes the rename fail.
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"").unwrap();
        let store = LedgerStore::new(&path).with_retry(1, Duration::from_millis(1));

        assert!(store.save(&Ledger::default()).await.is_err());

        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ truncated").unwrap();

        let err = LedgerStore::new(&path).load().await.unwrap_err();

        assert_matches!(err, LedgerError::Corrupt { .. });
        // the corrupt file is left for inspection
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ truncated");
    }

    #[tokio::test]
    async fn unwritable_path_fails_after_all_attempts() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = LedgerStore::new(blocker.join("state.json"))
            .with_retry(3, Duration::from_millis(1));

        let err = store.save(&Ledger::default()).await.unwrap_err();

        assert_matches!(err, LedgerError::Write { attempts: 3, .. });
    }
}
