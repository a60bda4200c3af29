//! Configuration types for batch processing runs

use crate::error::{PipelineError, Result};
use std::time::Duration;

/// Published free-tier quota of the remote refinement service (requests per minute).
/// The local limiter must never be configured looser than this.
pub const REMOTE_QUOTA_PER_MINUTE: u32 = 15;

/// Default number of concurrently active jobs
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Opaque credential for the remote refinement service.
///
/// Supplied by the surrounding application for the lifetime of one run. The
/// pipeline never persists it, and `Debug` output redacts the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential(String);

impl ApiCredential {
    /// Wrap a credential string
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    /// Access the raw credential for an outgoing request
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiCredential(***)")
    }
}

/// Request-rate bound for the AI refinement stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum requests allowed inside one window
    pub max_requests: u32,
    /// Length of the rolling window
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: REMOTE_QUOTA_PER_MINUTE,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimit {
    /// Requests per minute this limit works out to, for quota validation
    #[must_use]
    pub fn requests_per_minute(&self) -> f64 {
        f64::from(self.max_requests) * 60.0 / self.window.as_secs_f64()
    }
}

/// Options for one batch processing run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Whether to run the AI edge-refinement stage after background removal
    pub use_ai_refinement: bool,
    /// Maximum number of jobs actively executing at once
    pub concurrency_limit: usize,
    /// Credential for the refinement service (required when refinement is on)
    pub credential: Option<ApiCredential>,
    /// Rate limit applied to refinement calls across all workers
    pub rate_limit: RateLimit,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            use_ai_refinement: false,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            credential: None,
            rate_limit: RateLimit::default(),
        }
    }
}

impl BatchOptions {
    /// Create a builder for batch options
    #[must_use]
    pub fn builder() -> BatchOptionsBuilder {
        BatchOptionsBuilder::default()
    }
}

/// Builder for [`BatchOptions`] with validation
#[derive(Debug, Clone, Default)]
pub struct BatchOptionsBuilder {
    use_ai_refinement: bool,
    concurrency_limit: Option<usize>,
    credential: Option<ApiCredential>,
    rate_limit: Option<RateLimit>,
}

impl BatchOptionsBuilder {
    /// Enable or disable the AI refinement stage
    #[must_use]
    pub fn use_ai_refinement(mut self, enabled: bool) -> Self {
        self.use_ai_refinement = enabled;
        self
    }

    /// Set the maximum number of concurrently active jobs
    #[must_use]
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// Set the refinement service credential
    #[must_use]
    pub fn credential(mut self, credential: ApiCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Override the refinement rate limit
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Validate and build the options
    pub fn build(self) -> Result<BatchOptions> {
        let concurrency_limit = self.concurrency_limit.unwrap_or(DEFAULT_CONCURRENCY_LIMIT);
        if concurrency_limit == 0 {
            return Err(PipelineError::invalid_config(
                "concurrency_limit must be at least 1",
            ));
        }

        let rate_limit = self.rate_limit.unwrap_or_default();
        if rate_limit.max_requests == 0 {
            return Err(PipelineError::invalid_config(
                "rate_limit.max_requests must be at least 1",
            ));
        }
        if rate_limit.window.is_zero() {
            return Err(PipelineError::invalid_config(
                "rate_limit.window must be non-zero",
            ));
        }
        if rate_limit.requests_per_minute() > f64::from(REMOTE_QUOTA_PER_MINUTE) {
            return Err(PipelineError::invalid_config(format!(
                "rate limit of {} requests per {:?} exceeds the remote quota of {} per minute",
                rate_limit.max_requests, rate_limit.window, REMOTE_QUOTA_PER_MINUTE
            )));
        }

        if self.use_ai_refinement && self.credential.is_none() {
            return Err(PipelineError::invalid_config(
                "AI refinement requires a credential",
            ));
        }

        Ok(BatchOptions {
            use_ai_refinement: self.use_ai_refinement,
            concurrency_limit,
            credential: self.credential,
            rate_limit,
        })
    }
}
