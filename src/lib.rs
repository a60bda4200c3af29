#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! # nukki-batch
//!
//! A concurrency-bounded batch pipeline for product-image background
//! removal with optional AI-driven edge refinement.
//!
//! The pipeline takes a user-selected set of source images, drives each one
//! through background removal and (optionally) a rate-limited remote
//! refinement stage on a bounded worker pool, tracks per-image progress,
//! isolates per-image failures, and finally exports the completed cutouts
//! as `{baseName}_nukki.png` files.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nukki_batch::{run_batch, BatchOptions, ExportManager};
//! use std::path::{Path, PathBuf};
//!
//! # async fn example() -> nukki_batch::Result<()> {
//! let paths = vec![PathBuf::from("shoe.jpg"), PathBuf::from("bag.png")];
//! let session = run_batch(paths, BatchOptions::default());
//!
//! // Poll progress from any thread while workers run
//! for job in session.snapshot() {
//!     println!("{}: {}", job.source_path.display(), job.status);
//! }
//!
//! session.wait_finished().await;
//! let report = ExportManager::export(&session, Path::new("./output"))?;
//! println!("exported {} files", report.succeeded.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## With AI refinement
//!
//! The refinement stage calls a remote vision service and is throttled by a
//! shared sliding-window rate limiter, never configured looser than the
//! service's published quota:
//!
//! ```rust,no_run
//! use nukki_batch::{run_batch, ApiCredential, BatchOptions};
//!
//! # fn example(paths: Vec<std::path::PathBuf>) -> nukki_batch::Result<()> {
//! let options = BatchOptions::builder()
//!     .use_ai_refinement(true)
//!     .credential(ApiCredential::new(std::env::var("GEMINI_API_KEY").unwrap()))
//!     .concurrency_limit(4)
//!     .build()?;
//! let session = run_batch(paths, options);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom backends
//!
//! The scheduler only depends on the [`BackgroundRemover`] and
//! [`EdgeRefiner`] traits; swap in any other implementation with
//! [`BatchScheduler::with_adapters`].

pub mod adapters;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod limiter;
pub mod progress;
pub mod scheduler;
pub mod tracker;

// Public API exports
pub use adapters::{BackgroundRemover, ChromaKeyRemover, EdgeAnalysis, EdgeRefiner, GeminiRefiner};
pub use config::{
    ApiCredential, BatchOptions, BatchOptionsBuilder, RateLimit, DEFAULT_CONCURRENCY_LIMIT,
    REMOTE_QUOTA_PER_MINUTE,
};
pub use error::{AiProcessingError, ExportError, PipelineError, Result};
pub use export::{ExportManager, ExportReport};
pub use job::{JobError, JobErrorKind, JobId, JobStatus};
pub use limiter::RateLimiter;
pub use progress::{ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter};
pub use scheduler::{BatchScheduler, BatchSession};
pub use tracker::{JobSnapshot, StatusTracker};

/// Start a batch with the bundled adapters, returning immediately.
///
/// One job is created per source path, preserving input order; jobs
/// progress asynchronously on the scheduler's worker pool. Observe progress
/// through [`BatchSession::snapshot`] and await [`BatchSession::wait_finished`]
/// before exporting.
///
/// Must be called from within a Tokio runtime.
pub fn run_batch(source_paths: Vec<std::path::PathBuf>, options: BatchOptions) -> BatchSession {
    BatchScheduler::new().run(source_paths, options)
}
