//! Error types for the batch processing pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Comprehensive error types for batch pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input/output errors (unreadable source file, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Background removal failures (decode failure, unsupported format, model failure)
    #[error("Background removal error: {0}")]
    BackgroundRemoval(String),

    /// AI refinement failures, carrying the specific remote-service sub-kind
    #[error("AI processing error: {0}")]
    AiProcessing(#[from] AiProcessingError),

    /// Batch export failures
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// The batch was cancelled before this operation could finish
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by (or on the way to) the remote refinement service
#[derive(Error, Debug)]
pub enum AiProcessingError {
    /// The credential was rejected by the remote service
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The remote service reported its own quota as exhausted.
    /// Distinct from the local rate limiter, which never produces an error.
    #[error("remote quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Transport-level failure reaching the remote service
    #[error("network error: {0}")]
    NetworkError(String),

    /// The remote service answered with something unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Failures raised by the export manager
#[derive(Error, Debug)]
pub enum ExportError {
    /// A single output file could not be written
    #[error("failed to write '{path}': {reason}")]
    WriteFailure {
        /// Destination path of the failed write
        path: PathBuf,
        /// Underlying failure description
        reason: String,
    },

    /// Export was requested while the batch still had non-terminal jobs
    #[error("batch has unfinished jobs; export requires every job to be terminal")]
    NotFinished,
}

impl PipelineError {
    /// Create a new background removal error
    pub fn background_removal<S: Into<String>>(msg: S) -> Self {
        Self::BackgroundRemoval(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Whether this error represents cancellation rather than a real failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
