//! Meshy text-to-3D REST client.
//!
//! Provides typed request/response bodies, an HTTP client for task
//! submission and status queries, streaming artifact downloads, and the
//! [`JobRunner`](meshforge_core::runner::JobRunner) implementation the
//! pipeline drives.

pub mod api;
pub mod download;
pub mod messages;
pub mod runner;

pub use api::{MeshyApi, MeshyApiError, MeshyConfig};
