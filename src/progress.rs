//! Progress reporting
//!
//! Separates progress reporting from the pipeline itself: the tracker pushes
//! every job transition through a [`ProgressReporter`], and each front end
//! (CLI, GUI shell, tests) brings its own implementation.

use crate::tracker::JobSnapshot;

/// Trait for observing job transitions as they happen
pub trait ProgressReporter: Send + Sync {
    /// Called synchronously on every job status transition
    fn report_transition(&self, snapshot: &JobSnapshot);

    /// Called once when every job in the batch has reached a terminal state
    fn report_batch_finished(&self, completed: usize, failed: usize) {
        let _ = (completed, failed);
    }
}

/// No-op progress reporter that discards all updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_transition(&self, _snapshot: &JobSnapshot) {
        // Intentionally empty
    }
}

/// Progress reporter that logs transitions
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_transition(&self, snapshot: &JobSnapshot) {
        if let Some(error) = &snapshot.error {
            log::warn!(
                "{}: {} ({error})",
                snapshot.source_path.display(),
                snapshot.status
            );
        } else if self.verbose {
            log::info!("{}: {}", snapshot.source_path.display(), snapshot.status);
        }
    }

    fn report_batch_finished(&self, completed: usize, failed: usize) {
        log::info!("batch finished: {completed} completed, {failed} failed");
    }
}
