//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use meshforge_core::runner::ArtifactFormat;
use meshforge_meshy::api::{DEFAULT_BASE_URL, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use meshforge_meshy::MeshyConfig;
use meshforge_pipeline::config::{
    PipelineConfig, PollerConfig, DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_MAX_POLL_TIME,
    DEFAULT_POLL_CONCURRENCY, DEFAULT_POLL_INTERVAL, DEFAULT_SUBMIT_CONCURRENCY,
    DEFAULT_SUBMIT_DELAY,
};

pub const DEFAULT_MANIFEST_PATH: &str = "tools/assets.json";
pub const DEFAULT_ASSETS_ROOT: &str = "Assets";
pub const DEFAULT_LEDGER_PATH: &str = "tools/.generation_state.json";

/// Errors raised while reading the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the worker binary needs to start a run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub meshy: MeshyConfig,
    /// JSON work-item manifest.
    pub manifest_path: PathBuf,
    pub ledger_path: PathBuf,
    pub pipeline: PipelineConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                            |
    /// |-------------------------------|------------------------------------|
    /// | `MESHY_API_KEY`               | required                           |
    /// | `MESHY_BASE_URL`              | `https://api.meshy.ai/openapi/v2`  |
    /// | `MESHY_REQUEST_TIMEOUT_SECS`  | `30`                               |
    /// | `MESHY_DOWNLOAD_TIMEOUT_SECS` | `120`                              |
    /// | `ASSET_MANIFEST`              | `tools/assets.json`                |
    /// | `ASSETS_ROOT`                 | `Assets`                           |
    /// | `LEDGER_PATH`                 | `tools/.generation_state.json`     |
    /// | `POLL_INTERVAL_SECS`          | `10`                               |
    /// | `MAX_POLL_SECS`               | `600`                              |
    /// | `SUBMIT_DELAY_MS`             | `500`                              |
    /// | `SUBMIT_CONCURRENCY`          | `1`                                |
    /// | `POLL_CONCURRENCY`            | `8`                                |
    /// | `DOWNLOAD_CONCURRENCY`        | `4`                                |
    /// | `ARTIFACT_FORMAT`             | `glb`                              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let api_key = env
            .string("MESHY_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("MESHY_API_KEY"))?;

        let meshy = MeshyConfig {
            base_url: env
                .string("MESHY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            request_timeout: env
                .secs("MESHY_REQUEST_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            download_timeout: env
                .secs("MESHY_DOWNLOAD_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
        };

        let pipeline = PipelineConfig {
            assets_root: env
                .string("ASSETS_ROOT")
                .unwrap_or_else(|| DEFAULT_ASSETS_ROOT.into())
                .into(),
            poller: PollerConfig {
                interval: env
                    .secs("POLL_INTERVAL_SECS")?
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                max_poll_time: env.secs("MAX_POLL_SECS")?.unwrap_or(DEFAULT_MAX_POLL_TIME),
                concurrency: env
                    .parse("POLL_CONCURRENCY")?
                    .unwrap_or(DEFAULT_POLL_CONCURRENCY),
            },
            submit_delay: env
                .parse::<u64>("SUBMIT_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SUBMIT_DELAY),
            submit_concurrency: env
                .parse("SUBMIT_CONCURRENCY")?
                .unwrap_or(DEFAULT_SUBMIT_CONCURRENCY),
            download_concurrency: env
                .parse("DOWNLOAD_CONCURRENCY")?
                .unwrap_or(DEFAULT_DOWNLOAD_CONCURRENCY),
            artifact_format: env
                .parse::<ArtifactFormat>("ARTIFACT_FORMAT")?
                .unwrap_or_default(),
            ..PipelineConfig::default()
        };

        Ok(Self {
            meshy,
            manifest_path: env
                .string("ASSET_MANIFEST")
                .unwrap_or_else(|| DEFAULT_MANIFEST_PATH.into())
                .into(),
            ledger_path: env
                .string("LEDGER_PATH")
                .unwrap_or_else(|| DEFAULT_LEDGER_PATH.into())
                .into(),
            pipeline,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of `var`, if set.
    fn string(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(var) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                    value,
                }),
        }
    }

    fn secs(&self, var: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(var)?.map(Duration::from_secs))
    }
}
