//! Work-item descriptors and manifest loading.
//!
//! A [`WorkItem`] is the static description of one asset to generate: its
//! stable name, the request parameters forwarded to the generation service,
//! and where the downloaded model lands under the assets root. Items are
//! loaded once from a JSON manifest and never mutated during a run.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Polycount used when a manifest entry does not specify one.
pub const DEFAULT_TARGET_POLYCOUNT: u32 = 5000;

/// Lowest polycount the service accepts.
pub const MIN_TARGET_POLYCOUNT: u32 = 100;

/// Highest polycount the service accepts.
pub const MAX_TARGET_POLYCOUNT: u32 = 300_000;

/// Default art style for preview requests.
pub const DEFAULT_ART_STYLE: &str = "realistic";

/// Default mesh topology for preview requests.
pub const DEFAULT_TOPOLOGY: &str = "triangle";

/// Maximum length of a work-item name.
const MAX_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One asset to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique key, stable across runs. Used as the ledger key.
    pub name: String,
    /// Directory under the assets root, e.g. `Models/Weapons`.
    pub output_dir: String,
    /// File name of the downloaded model, e.g. `bronze_sword.glb`.
    pub filename: String,
    /// Parameters forwarded to the generation service.
    #[serde(flatten)]
    pub request: GenerationParams,
}

/// Stage-specific request parameters. Opaque to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_polycount")]
    pub target_polycount: u32,
    #[serde(default = "default_art_style")]
    pub art_style: String,
    #[serde(default = "default_topology")]
    pub topology: String,
    #[serde(default = "default_true")]
    pub should_remesh: bool,
    /// Only used by the refine stage.
    #[serde(default = "default_true")]
    pub enable_pbr: bool,
}

fn default_polycount() -> u32 {
    DEFAULT_TARGET_POLYCOUNT
}

fn default_art_style() -> String {
    DEFAULT_ART_STYLE.to_string()
}

fn default_topology() -> String {
    DEFAULT_TOPOLOGY.to_string()
}

fn default_true() -> bool {
    true
}

impl WorkItem {
    /// Relative path of the output file, `output_dir/filename`.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join(&self.filename)
    }

    /// Absolute (or root-relative) destination under `assets_root`.
    pub fn destination(&self, assets_root: &Path) -> PathBuf {
        assets_root.join(self.relative_path())
    }

    /// Validate a single item in isolation.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_name(&self.name)?;

        if self.request.prompt.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "'{}': prompt must not be empty",
                self.name
            )));
        }

        validate_relative_path(&self.name, "output_dir", &self.output_dir)?;

        if self.filename.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "'{}': filename must not be empty",
                self.name
            )));
        }
        if self.filename.contains('/') || self.filename.contains('\\') {
            return Err(CoreError::Validation(format!(
                "'{}': filename must not contain path separators",
                self.name
            )));
        }

        validate_polycount(&self.name, self.request.target_polycount)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a name is non-empty, bounded, and has no surrounding whitespace.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "name '{name}' exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if name.trim() != name {
        return Err(CoreError::Validation(format!(
            "name '{name}' has leading or trailing whitespace"
        )));
    }
    Ok(())
}

/// Validate a polycount against the service limits.
pub fn validate_polycount(name: &str, polycount: u32) -> Result<(), CoreError> {
    if !(MIN_TARGET_POLYCOUNT..=MAX_TARGET_POLYCOUNT).contains(&polycount) {
        return Err(CoreError::Validation(format!(
            "'{name}': target_polycount {polycount} outside \
             {MIN_TARGET_POLYCOUNT}..={MAX_TARGET_POLYCOUNT}"
        )));
    }
    Ok(())
}

/// Reject absolute paths and parent-directory components so every output
/// stays inside the assets root.
fn validate_relative_path(name: &str, field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!(
            "'{name}': {field} must not be empty"
        )));
    }
    let escapes = Path::new(value).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(CoreError::Validation(format!(
            "'{name}': {field} '{value}' must be a relative path inside the assets root"
        )));
    }
    Ok(())
}

/// Validate a whole batch: every item individually, plus uniqueness of
/// names and of output paths.
pub fn validate_batch(items: &[WorkItem]) -> Result<(), CoreError> {
    let mut names = HashSet::with_capacity(items.len());
    let mut paths: HashMap<PathBuf, &str> = HashMap::with_capacity(items.len());
    for item in items {
        item.validate()?;
        if !names.insert(item.name.as_str()) {
            return Err(CoreError::Validation(format!(
                "duplicate work item name '{}'",
                item.name
            )));
        }
        if let Some(other) = paths.insert(item.relative_path(), item.name.as_str()) {
            return Err(CoreError::Validation(format!(
                "'{}' and '{}' write to the same output path '{}'",
                other,
                item.name,
                item.relative_path().display()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Manifest loading
// ---------------------------------------------------------------------------

/// Parse a JSON manifest (an array of work items) and validate it.
pub fn parse_manifest(json: &str) -> Result<Vec<WorkItem>, CoreError> {
    let items: Vec<WorkItem> =
        serde_json::from_str(json).map_err(|e| CoreError::Manifest(e.to_string()))?;
    validate_batch(&items)?;
    Ok(items)
}

/// Read and parse a manifest file. Order is preserved.
pub fn load_manifest(path: &Path) -> Result<Vec<WorkItem>, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Manifest(format!("failed to read {}: {e}", path.display()))
    })?;
    parse_manifest(&text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
