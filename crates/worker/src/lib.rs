//! Batch asset generation worker.
//!
//! The binary reads [`config::WorkerConfig`] from the environment, loads the
//! work-item manifest and drives one pipeline run against the Meshy API.

pub mod config;
