//! Meme job worker.
//!
//! This crate provides:
//! - The stream executor that dispatches "new" and "continue" messages
//! - Phase 1 (script draft) and Phase 2 (lip-sync, render, verify)
//! - Structured job logging and worker metrics

pub mod config;
pub mod deps;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;

pub use config::WorkerConfig;
pub use deps::{PipelineDeps, PipelineSettings};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::JobOutcome;
