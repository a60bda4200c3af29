//! Thread-safe status aggregation
//!
//! The tracker is a read-only view for the presentation layer, refreshed by
//! whichever worker owns a job at the moment it transitions. It is never the
//! source of truth; the session's job list is.

use crate::job::{Job, JobId, JobStatus};
use crate::progress::ProgressReporter;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Point-in-time view of one job, safe to hand to a presentation thread
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    /// Job identifier
    pub id: JobId,
    /// Path of the source image
    pub source_path: PathBuf,
    /// Status at snapshot time
    pub status: JobStatus,
    /// Failure summary, present only for failed jobs
    pub error: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id(),
            source_path: job.source_path().to_path_buf(),
            status: job.status(),
            error: job.error().map(crate::job::JobError::summary),
        }
    }
}

/// Aggregated batch view with consistent snapshots.
///
/// The write lock is held only for the duration of a single state write,
/// never across an adapter call.
pub struct StatusTracker {
    views: RwLock<Vec<JobSnapshot>>,
    reporter: Arc<dyn ProgressReporter>,
}

impl StatusTracker {
    /// Create a tracker seeded from the initial (all-`Queued`) job list
    pub(crate) fn new(jobs: &[Job], reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            views: RwLock::new(jobs.iter().map(JobSnapshot::from).collect()),
            reporter,
        }
    }

    /// Refresh the view of one job after a transition.
    ///
    /// Called by the single worker that owns the job, synchronously with the
    /// transition, before the worker moves on.
    pub(crate) fn update(&self, index: usize, job: &Job) {
        let snapshot = JobSnapshot::from(job);
        {
            let mut views = self.views.write().expect("status tracker lock poisoned");
            if let Some(slot) = views.get_mut(index) {
                *slot = snapshot.clone();
            }
        }
        self.reporter.report_transition(&snapshot);
    }

    /// Report batch completion through the attached reporter
    pub(crate) fn finish(&self) {
        let (completed, failed) = {
            let views = self.views.read().expect("status tracker lock poisoned");
            let completed = views
                .iter()
                .filter(|v| v.status == JobStatus::Completed)
                .count();
            let failed = views.iter().filter(|v| v.status == JobStatus::Failed).count();
            (completed, failed)
        };
        self.reporter.report_batch_finished(completed, failed);
    }

    /// Consistent ordered snapshot of every job, in input order.
    ///
    /// Safe to call from any thread while workers run; two calls with no
    /// intervening transition return identical results.
    #[must_use]
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.views
            .read()
            .expect("status tracker lock poisoned")
            .clone()
    }

    /// Whether every job is in a terminal state
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.views
            .read()
            .expect("status tracker lock poisoned")
            .iter()
            .all(|v| v.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobError;
    use crate::progress::NoOpProgressReporter;
    use std::sync::Mutex;

    struct CapturingReporter {
        transitions: Arc<Mutex<Vec<JobSnapshot>>>,
    }

    impl ProgressReporter for CapturingReporter {
        fn report_transition(&self, snapshot: &JobSnapshot) {
            self.transitions.lock().unwrap().push(snapshot.clone());
        }
    }

    #[test]
    fn test_snapshot_preserves_input_order() {
        let jobs = vec![Job::new("b.png"), Job::new("a.png"), Job::new("c.png")];
        let tracker = StatusTracker::new(&jobs, Arc::new(NoOpProgressReporter));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].source_path, PathBuf::from("b.png"));
        assert_eq!(snapshot[1].source_path, PathBuf::from("a.png"));
        assert_eq!(snapshot[2].source_path, PathBuf::from("c.png"));
    }

    #[test]
    fn test_snapshot_is_idempotent_without_transitions() {
        let jobs = vec![Job::new("a.png"), Job::new("b.png")];
        let tracker = StatusTracker::new(&jobs, Arc::new(NoOpProgressReporter));
        assert_eq!(tracker.snapshot(), tracker.snapshot());
    }

    #[test]
    fn test_update_reflects_transition_and_notifies_reporter() {
        let mut jobs = vec![Job::new("a.png")];
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let tracker = StatusTracker::new(
            &jobs,
            Arc::new(CapturingReporter {
                transitions: Arc::clone(&transitions),
            }),
        );

        jobs[0].start_background_removal().unwrap();
        tracker.update(0, &jobs[0]);

        jobs[0].fail(JobError::cancelled()).unwrap();
        tracker.update(0, &jobs[0]);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot[0].status, JobStatus::Failed);
        assert!(snapshot[0].error.as_deref().unwrap().contains("cancelled"));

        let seen = transitions.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].status, JobStatus::RemovingBackground);
        assert_eq!(seen[1].status, JobStatus::Failed);
    }

    #[test]
    fn test_all_terminal() {
        let mut jobs = vec![Job::new("a.png"), Job::new("b.png")];
        let tracker = StatusTracker::new(&jobs, Arc::new(NoOpProgressReporter));
        assert!(!tracker.all_terminal());

        for (i, job) in jobs.iter_mut().enumerate() {
            job.start_background_removal().unwrap();
            job.fail(JobError::cancelled()).unwrap();
            tracker.update(i, job);
        }
        assert!(tracker.all_terminal());
    }
}
