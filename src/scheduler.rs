//! Batch scheduler, bounded worker pool, and session lifecycle
//!
//! `BatchScheduler::run` turns a list of source paths into a
//! [`BatchSession`] whose jobs progress asynchronously on a pool of at most
//! `concurrency_limit` workers. Each worker drives one job end to end
//! through its stage sequence; a stage failure terminates only that job.

use crate::adapters::{BackgroundRemover, ChromaKeyRemover, EdgeRefiner, GeminiRefiner};
use crate::config::BatchOptions;
use crate::error::{PipelineError, Result};
use crate::job::{Job, JobError, JobId, JobStatus};
use crate::limiter::RateLimiter;
use crate::progress::{NoOpProgressReporter, ProgressReporter};
use crate::tracker::{JobSnapshot, StatusTracker};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

/// Shared state between the session handle and its workers.
///
/// The jobs mutex and the tracker's lock are the only cross-worker shared
/// mutable state; both are held only for single state writes, never across
/// an adapter call.
struct SessionCore {
    jobs: Mutex<Vec<Job>>,
    tracker: Arc<StatusTracker>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    options: BatchOptions,
}

impl SessionCore {
    /// Claim the first still-`Queued` job and move it into
    /// `RemovingBackground`. Input order is the tie-break for which job a
    /// freed worker takes next.
    fn claim_next(&self) -> Option<(usize, JobId, PathBuf)> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        let index = jobs.iter().position(|j| j.status() == JobStatus::Queued)?;
        let job = jobs.get_mut(index)?;
        if let Err(e) = job.start_background_removal() {
            error!("failed to claim job: {e}");
            return None;
        }
        let claimed = (index, job.id(), job.source_path().to_path_buf());
        self.tracker.update(index, job);
        Some(claimed)
    }

    fn mark_refining(&self, index: usize) {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        if let Some(job) = jobs.get_mut(index) {
            match job.start_refining() {
                Ok(()) => self.tracker.update(index, job),
                Err(e) => error!("failed to enter refining stage: {e}"),
            }
        }
    }

    fn complete(&self, index: usize, image: RgbaImage) {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        if let Some(job) = jobs.get_mut(index) {
            match job.complete(image) {
                Ok(()) => self.tracker.update(index, job),
                Err(e) => error!("failed to complete job: {e}"),
            }
        }
    }

    fn fail(&self, index: usize, job_error: JobError) {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        if let Some(job) = jobs.get_mut(index) {
            if job.status().is_terminal() {
                return;
            }
            match job.fail(job_error) {
                Ok(()) => self.tracker.update(index, job),
                Err(e) => error!("failed to record job failure: {e}"),
            }
        }
    }

    /// Promptly fail every job that has not been claimed yet
    fn fail_queued(&self) {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        for (index, job) in jobs.iter_mut().enumerate() {
            if job.status() == JobStatus::Queued && job.fail(JobError::cancelled()).is_ok() {
                self.tracker.update(index, job);
            }
        }
    }

    /// Safety net after all workers exited: no job may be left non-terminal
    fn fail_remaining(&self) {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        for (index, job) in jobs.iter_mut().enumerate() {
            if !job.status().is_terminal() && job.fail(JobError::cancelled()).is_ok() {
                self.tracker.update(index, job);
            }
        }
    }
}

/// One user-triggered batch run: its jobs, options, and progress signals.
///
/// A new run replaces the session wholesale; reprocessing requires a fresh
/// session from [`BatchScheduler::run`].
pub struct BatchSession {
    core: Arc<SessionCore>,
    finished: watch::Receiver<bool>,
}

impl BatchSession {
    /// Options this batch was started with
    #[must_use]
    pub fn options(&self) -> &BatchOptions {
        &self.core.options
    }

    /// Number of jobs in the batch
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.jobs.lock().expect("jobs lock poisoned").len()
    }

    /// Whether the batch holds no jobs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared status tracker for this batch
    #[must_use]
    pub fn tracker(&self) -> Arc<StatusTracker> {
        Arc::clone(&self.core.tracker)
    }

    /// Consistent ordered snapshot of every job
    #[must_use]
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.core.tracker.snapshot()
    }

    /// Whether every job has reached a terminal state
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until every job has reached a terminal state
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Cancel the batch: stop dispatching, release limiter waiters, and
    /// promptly fail all still-queued jobs with kind `Cancelled`. In-flight
    /// jobs observe cancellation at their next suspension point.
    pub fn cancel(&self) {
        info!("batch cancellation requested");
        self.core.cancel.cancel();
        self.core.fail_queued();
    }

    /// Borrow the job list (read-only) for batch-level consumers
    pub(crate) fn with_jobs<R>(&self, f: impl FnOnce(&[Job]) -> R) -> R {
        let jobs = self.core.jobs.lock().expect("jobs lock poisoned");
        f(&jobs)
    }
}

/// Creates sessions and drives their jobs across a bounded worker pool
pub struct BatchScheduler {
    remover: Arc<dyn BackgroundRemover>,
    refiner: Arc<dyn EdgeRefiner>,
    reporter: Arc<dyn ProgressReporter>,
}

impl BatchScheduler {
    /// Scheduler with the bundled adapters
    #[must_use]
    pub fn new() -> Self {
        Self::with_adapters(
            Arc::new(ChromaKeyRemover::new()),
            Arc::new(GeminiRefiner::new()),
        )
    }

    /// Scheduler with custom adapter implementations
    #[must_use]
    pub fn with_adapters(
        remover: Arc<dyn BackgroundRemover>,
        refiner: Arc<dyn EdgeRefiner>,
    ) -> Self {
        Self {
            remover,
            refiner,
            reporter: Arc::new(NoOpProgressReporter),
        }
    }

    /// Attach a progress reporter invoked on every job transition
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Start processing a batch, returning immediately with its session.
    ///
    /// One `Queued` job is created per source path, preserving input order.
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, source_paths: Vec<PathBuf>, options: BatchOptions) -> BatchSession {
        let jobs: Vec<Job> = source_paths.into_iter().map(Job::new).collect();
        let job_count = jobs.len();
        info!(
            jobs = job_count,
            concurrency = options.concurrency_limit,
            refinement = options.use_ai_refinement,
            "starting batch"
        );

        let tracker = Arc::new(StatusTracker::new(&jobs, Arc::clone(&self.reporter)));
        let core = Arc::new(SessionCore {
            jobs: Mutex::new(jobs),
            tracker,
            limiter: Arc::new(RateLimiter::from_limit(options.rate_limit)),
            cancel: CancellationToken::new(),
            options,
        });

        let worker_count = core.options.concurrency_limit.min(job_count);
        let handles: Vec<_> = (0..worker_count)
            .map(|worker| {
                let core = Arc::clone(&core);
                let remover = Arc::clone(&self.remover);
                let refiner = Arc::clone(&self.refiner);
                tokio::spawn(
                    worker_loop(core, remover, refiner)
                        .instrument(info_span!("worker", worker)),
                )
            })
            .collect();

        let (tx, finished) = watch::channel(false);
        {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                for handle in handles {
                    let _ = handle.await;
                }
                core.fail_remaining();
                core.tracker.finish();
                let _ = tx.send(true);
            });
        }

        BatchSession { core, finished }
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull queued jobs until none remain or the batch is cancelled
async fn worker_loop(
    core: Arc<SessionCore>,
    remover: Arc<dyn BackgroundRemover>,
    refiner: Arc<dyn EdgeRefiner>,
) {
    while let Some((index, id, path)) = core.claim_next() {
        let span = info_span!("job", %id, path = %path.display());
        async {
            match run_stages(&core, remover.as_ref(), refiner.as_ref(), index, &path).await {
                Ok(image) => core.complete(index, image),
                Err(e) => {
                    if !e.is_cancelled() {
                        error!("job failed: {e}");
                    }
                    core.fail(index, JobError::from(&e));
                },
            }
        }
        .instrument(span)
        .await;
    }
}

/// Drive one job through its stage sequence, strictly sequentially
async fn run_stages(
    core: &SessionCore,
    remover: &dyn BackgroundRemover,
    refiner: &dyn EdgeRefiner,
    index: usize,
    path: &Path,
) -> Result<RgbaImage> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::file_io_error("read source image", path, &e))?;

    let removed = tokio::select! {
        () = core.cancel.cancelled() => return Err(PipelineError::Cancelled),
        result = remover.remove(&bytes) => result?,
    };

    if !core.options.use_ai_refinement {
        return Ok(removed);
    }

    core.mark_refining(index);
    core.limiter.acquire(&core.cancel).await?;

    let credential = core
        .options
        .credential
        .as_ref()
        .ok_or_else(|| PipelineError::invalid_config("AI refinement requires a credential"))?;

    let refined = tokio::select! {
        () = core.cancel.cancelled() => return Err(PipelineError::Cancelled),
        result = refiner.refine(&removed, credential) => result?,
    };
    Ok(refined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiCredential;
    use crate::error::AiProcessingError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Background remover that succeeds without touching the filesystem
    /// payload and tracks how many removals run at once.
    struct CountingRemover {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingRemover {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BackgroundRemover for CountingRemover {
        async fn remove(&self, _bytes: &[u8]) -> Result<RgbaImage> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(RgbaImage::new(1, 1))
        }
    }

    struct FailingRefiner;

    #[async_trait]
    impl EdgeRefiner for FailingRefiner {
        async fn refine(
            &self,
            _image: &RgbaImage,
            _credential: &ApiCredential,
        ) -> Result<RgbaImage> {
            Err(AiProcessingError::InvalidCredential("401".to_string()).into())
        }
    }

    fn temp_sources(dir: &tempfile::TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, b"stub").unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_jobs_reach_a_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_sources(&dir, &["a.png", "b.png", "c.png"]);

        let scheduler = BatchScheduler::with_adapters(
            Arc::new(CountingRemover::new()),
            Arc::new(FailingRefiner),
        );
        let session = scheduler.run(paths, BatchOptions::default());
        session.wait_finished().await;

        assert!(session.is_finished());
        for snapshot in session.snapshot() {
            assert_eq!(snapshot.status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..12).map(|i| format!("img{i:02}.png")).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let paths = temp_sources(&dir, &name_refs);

        let remover = Arc::new(CountingRemover::new());
        let scheduler =
            BatchScheduler::with_adapters(Arc::clone(&remover) as Arc<dyn BackgroundRemover>, Arc::new(FailingRefiner));
        let options = BatchOptions::builder().concurrency_limit(3).build().unwrap();

        let session = scheduler.run(paths, options);
        session.wait_finished().await;

        assert!(remover.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_missing_source_fails_only_that_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = temp_sources(&dir, &["ok.png"]);
        paths.push(dir.path().join("missing.png"));

        let scheduler = BatchScheduler::with_adapters(
            Arc::new(CountingRemover::new()),
            Arc::new(FailingRefiner),
        );
        let session = scheduler.run(paths, BatchOptions::default());
        session.wait_finished().await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot[0].status, JobStatus::Completed);
        assert_eq!(snapshot[1].status, JobStatus::Failed);
        assert!(snapshot[1].error.as_deref().unwrap().starts_with("io:"));
    }

    #[tokio::test]
    async fn test_refinement_failure_carries_its_kind() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_sources(&dir, &["a.png"]);

        let scheduler = BatchScheduler::with_adapters(
            Arc::new(CountingRemover::new()),
            Arc::new(FailingRefiner),
        );
        let options = BatchOptions::builder()
            .use_ai_refinement(true)
            .credential(ApiCredential::new("bad-key"))
            .build()
            .unwrap();

        let session = scheduler.run(paths, options);
        session.wait_finished().await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot[0].status, JobStatus::Failed);
        assert!(snapshot[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("invalid-credential:"));
    }

    #[tokio::test]
    async fn test_empty_batch_finishes_immediately() {
        let scheduler = BatchScheduler::with_adapters(
            Arc::new(CountingRemover::new()),
            Arc::new(FailingRefiner),
        );
        let session = scheduler.run(Vec::new(), BatchOptions::default());
        session.wait_finished().await;
        assert!(session.is_finished());
        assert!(session.is_empty());
        assert!(session.snapshot().is_empty());
    }
}
