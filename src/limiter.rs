//! Shared rate limiter for the AI refinement stage
//!
//! Bounds how often the refinement service may be called across all
//! concurrent workers of one batch: at most `max_requests` calls inside any
//! rolling window. Waiting is cooperative and cancellation-aware, so a
//! blocked worker never stalls the rest of the batch and a cancelled batch
//! never leaves a worker parked here.

use crate::config::RateLimit;
use crate::error::{PipelineError, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sliding-window rate limiter shared across workers via `Arc`
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    // Instants of the calls still inside the current window, oldest first.
    // Locked only long enough to prune and record; never across a sleep.
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a limiter from configured options
    #[must_use]
    pub fn from_limit(limit: RateLimit) -> Self {
        Self::new(limit.max_requests, limit.window)
    }

    /// Wait until a permit is available, then consume it.
    ///
    /// Returns [`PipelineError::Cancelled`] if the batch is cancelled while
    /// waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let wait_until = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
                {
                    calls.pop_front();
                }
                if calls.len() < self.max_requests {
                    calls.push_back(now);
                    return Ok(());
                }
                // Full window: a permit frees when the oldest call ages out
                calls.front().copied().map_or(now, |oldest| oldest + self.window)
            };

            tokio::select! {
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                () = tokio::time::sleep_until(wait_until) => {},
            }
        }
    }

    /// Number of permits that would be granted right now without waiting
    pub async fn available_permits(&self) -> usize {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        while calls
            .front()
            .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
        {
            calls.pop_front();
        }
        self.max_requests - calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_permits_within_quota_are_immediate() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert_eq!(limiter.available_permits().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_window_blocks_until_oldest_ages_out() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire(&cancel).await.unwrap();

        // Third acquire must wait until the first call leaves the window
        // (50 more seconds), not until the second does.
        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(50), "waited {waited:?}");
        assert!(waited < Duration::from_secs(60), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_never_exceeds_quota() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let mut grants: Vec<Instant> = Vec::new();

        for _ in 0..12 {
            limiter.acquire(&cancel).await.unwrap();
            grants.push(Instant::now());
        }

        for (i, &start) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .take_while(|&&t| t.duration_since(start) < Duration::from_secs(60))
                .count();
            assert!(in_window <= 5, "{in_window} grants inside one window");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_blocked_waiter() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        // Let the waiter park on the full window, then cancel
        tokio::time::advance(Duration::from_secs(1)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_after_cancellation_fails_fast() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = limiter.acquire(&cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        // No permit was consumed
        assert_eq!(limiter.available_permits().await, 5);
    }
}
