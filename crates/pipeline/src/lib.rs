//! Batch orchestration for multi-stage remote generation.
//!
//! The [`orchestrator::Orchestrator`] pushes a whole batch of work items
//! through preview submission, preview polling, refine submission, refine
//! polling and download, with a barrier between phases. The
//! [`ledger::LedgerStore`] records submissions and completions so an
//! interrupted run can resume without resubmitting finished work.

pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod poller;
pub mod summary;
