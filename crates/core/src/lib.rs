//! Domain model for batch text-to-3D generation.
//!
//! Holds the work-item descriptors, the per-stage job record, and the
//! [`runner::JobRunner`] trait that every remote generation backend
//! implements. This crate has no internal dependencies so both the HTTP
//! client and the pipeline can build on it.

pub mod error;
pub mod job;
pub mod runner;
pub mod work_item;
