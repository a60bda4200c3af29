//! Job model and per-item state machine

use crate::error::{AiProcessingError, PipelineError, Result};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Opaque unique identifier for a job, stable for the job's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Processing status of a single job.
///
/// Progression is strictly forward: `Queued` → `RemovingBackground` →
/// (`Refining` →) `Completed`/`Failed`. The two terminal states are never
/// left once entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    /// Waiting for a free worker
    Queued,
    /// Background removal stage in progress
    RemovingBackground,
    /// AI edge refinement stage in progress
    Refining,
    /// Finished successfully; the job holds a result image
    Completed,
    /// Finished with an error; the job holds an error
    Failed,
}

impl JobStatus {
    /// Whether this status is terminal
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Get a human-readable description of the status
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Queued => "Waiting in queue",
            Self::RemovingBackground => "Removing background",
            Self::Refining => "Refining edges",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::RemovingBackground => 1,
            Self::Refining => 2,
            Self::Completed | Self::Failed => 3,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Error kind recorded on a failed job, distinguishable in status snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobErrorKind {
    /// Source file could not be read
    Io,
    /// Background removal stage failed
    BackgroundRemoval,
    /// Refinement service rejected the credential
    InvalidCredential,
    /// Refinement service reported its quota exhausted
    QuotaExceeded,
    /// Refinement service could not be reached
    Network,
    /// Refinement service answered with something unusable
    InvalidResponse,
    /// The batch was cancelled before the job finished
    Cancelled,
    /// Unexpected internal failure
    Internal,
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Io => "io",
            Self::BackgroundRemoval => "background-removal",
            Self::InvalidCredential => "invalid-credential",
            Self::QuotaExceeded => "quota-exceeded",
            Self::Network => "network",
            Self::InvalidResponse => "invalid-response",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Error recorded on a job that entered the `Failed` state
#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    /// Classified failure kind
    pub kind: JobErrorKind,
    /// Human-readable failure description
    pub message: String,
}

impl JobError {
    /// Create a cancellation error
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: JobErrorKind::Cancelled,
            message: "batch cancelled".to_string(),
        }
    }

    /// One-line summary for status snapshots
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

impl From<&PipelineError> for JobError {
    fn from(error: &PipelineError) -> Self {
        let kind = match error {
            PipelineError::Io(_) => JobErrorKind::Io,
            PipelineError::BackgroundRemoval(_) => JobErrorKind::BackgroundRemoval,
            PipelineError::AiProcessing(ai) => match ai {
                AiProcessingError::InvalidCredential(_) => JobErrorKind::InvalidCredential,
                AiProcessingError::QuotaExceeded(_) => JobErrorKind::QuotaExceeded,
                AiProcessingError::NetworkError(_) => JobErrorKind::Network,
                AiProcessingError::InvalidResponse(_) => JobErrorKind::InvalidResponse,
            },
            PipelineError::Cancelled => JobErrorKind::Cancelled,
            PipelineError::Export(_) | PipelineError::InvalidConfig(_) | PipelineError::Internal(_) => {
                JobErrorKind::Internal
            },
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// The unit of work: one source image and its mutable processing state.
///
/// Invariant: once terminal, a job holds exactly one of result or error,
/// and `finished_at` has been set exactly once.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    source_path: PathBuf,
    status: JobStatus,
    result: Option<RgbaImage>,
    error: Option<JobError>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new<P: Into<PathBuf>>(source_path: P) -> Self {
        Self {
            id: JobId::new(),
            source_path: source_path.into(),
            status: JobStatus::Queued,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Unique identifier assigned at creation
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Path to the original image
    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Result image, present only once the job is `Completed`
    #[must_use]
    pub fn result(&self) -> Option<&RgbaImage> {
        self.result.as_ref()
    }

    /// Failure details, present only once the job is `Failed`
    #[must_use]
    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    /// Creation timestamp
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Terminal timestamp, set exactly once on entering `Completed` or `Failed`
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn check_forward(&self, next: JobStatus) -> Result<()> {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return Err(PipelineError::internal(format!(
                "illegal job transition {} -> {} for {}",
                self.status, next, self.id
            )));
        }
        Ok(())
    }

    /// Enter the background removal stage
    pub(crate) fn start_background_removal(&mut self) -> Result<()> {
        self.check_forward(JobStatus::RemovingBackground)?;
        self.status = JobStatus::RemovingBackground;
        Ok(())
    }

    /// Enter the refinement stage
    pub(crate) fn start_refining(&mut self) -> Result<()> {
        self.check_forward(JobStatus::Refining)?;
        self.status = JobStatus::Refining;
        Ok(())
    }

    /// Finish successfully with a result image
    pub(crate) fn complete(&mut self, image: RgbaImage) -> Result<()> {
        self.check_forward(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.result = Some(image);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Finish with an error
    pub(crate) fn fail(&mut self, error: JobError) -> Result<()> {
        self.check_forward(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
