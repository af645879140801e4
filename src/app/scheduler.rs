//! Bounded concurrent request scheduling
//!
//! The scheduler runs a set of pending API requests through a bounded pool
//! of in-flight futures, aggregating results keyed by an opaque track id.
//! A wall-clock timeout is checked at dispatch time only: once it elapses,
//! requests that have not yet started are skipped while in-flight ones are
//! allowed to finish. Partial completion is the normal case; callers inspect
//! the aggregated counts rather than expecting an error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use indicatif::ProgressBar;
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::workers;
use crate::errors::Result;

/// A decoded response with its progress weight
///
/// `count` is the row/record count when the response exposes one, else 1.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub value: Value,
    pub count: usize,
}

impl Fetched {
    pub fn new(value: Value, count: usize) -> Self {
        Self { value, count }
    }
}

/// Aggregated results of a scheduler run, keyed by track id
pub type Outcomes = HashMap<String, Fetched>;

/// A pending request carrying its correlation key
pub struct TrackedRequest {
    track_id: String,
    future: BoxFuture<'static, Result<Fetched>>,
}

impl TrackedRequest {
    /// Wrap a future under an opaque track id
    pub fn new<F>(track_id: impl Into<String>, future: F) -> Self
    where
        F: std::future::Future<Output = Result<Fetched>> + Send + 'static,
    {
        Self {
            track_id: track_id.into(),
            future: future.boxed(),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }
}

impl std::fmt::Debug for TrackedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedRequest")
            .field("track_id", &self.track_id)
            .finish_non_exhaustive()
    }
}

/// Bounded pool for concurrent API requests
#[derive(Debug, Clone)]
pub struct RequestScheduler {
    max_workers: usize,
    timeout: Duration,
}

impl RequestScheduler {
    /// Create a scheduler with the given pool size and wall-clock budget
    pub fn new(max_workers: usize, timeout: Duration) -> Self {
        Self {
            max_workers: max_workers.clamp(1, workers::MAX_WORKER_COUNT),
            timeout,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run all requests, returning whatever completed successfully
    ///
    /// Results are collected as they complete; no ordering is guaranteed
    /// between concurrent requests. Failed requests are logged and excluded
    /// from the result map, never propagated.
    pub async fn run(&self, requests: Vec<TrackedRequest>, progress: Option<ProgressBar>) -> Outcomes {
        let started = Instant::now();
        let timeout = self.timeout;
        let total = requests.len();

        let completed: Vec<Option<(String, Fetched)>> = stream::iter(requests)
            .map(|request| {
                let progress = progress.clone();
                async move {
                    // Dispatch-time deadline: in-flight requests finish,
                    // not-yet-started ones are dropped here
                    if started.elapsed() >= timeout {
                        warn!(
                            track_id = %request.track_id,
                            "skipping request: wall-clock budget exhausted"
                        );
                        return None;
                    }

                    match request.future.await {
                        Ok(fetched) => {
                            if let Some(bar) = &progress {
                                bar.inc(fetched.count as u64);
                            }
                            debug!(
                                track_id = %request.track_id,
                                count = fetched.count,
                                "request completed"
                            );
                            Some((request.track_id, fetched))
                        }
                        Err(e) => {
                            warn!(track_id = %request.track_id, error = %e, "request failed");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let outcomes: Outcomes = completed.into_iter().flatten().collect();

        if outcomes.len() < total {
            warn!(
                completed = outcomes.len(),
                total,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scheduler finished with partial results"
            );
        }

        outcomes
    }

    /// Budget left after `elapsed` has been spent, zero when exhausted
    pub fn remaining_budget(&self, elapsed: Duration) -> Duration {
        self.timeout.saturating_sub(elapsed)
    }
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new(workers::DEFAULT_WORKER_COUNT, workers::DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ok_request(track_id: &str, count: usize) -> TrackedRequest {
        let value = json!({"track": track_id});
        TrackedRequest::new(track_id, async move { Ok(Fetched::new(value, count)) })
    }

    #[tokio::test]
    async fn test_results_keyed_by_track_id() {
        let scheduler = RequestScheduler::new(4, Duration::from_secs(10));
        let requests = vec![ok_request("a", 2), ok_request("b", 1), ok_request("c", 5)];

        let outcomes = scheduler.run(requests, None).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes["a"].count, 2);
        assert_eq!(outcomes["c"].value, json!({"track": "c"}));
    }

    #[tokio::test]
    async fn test_failed_requests_excluded_not_propagated() {
        let scheduler = RequestScheduler::new(2, Duration::from_secs(10));
        let requests = vec![
            ok_request("good", 1),
            TrackedRequest::new("bad", async {
                Err(ApiError::Status {
                    status: 500,
                    detail: "boom".into(),
                }
                .into())
            }),
        ];

        let outcomes = scheduler.run(requests, None).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes.contains_key("good"));
        assert!(!outcomes.contains_key("bad"));
    }

    #[tokio::test]
    async fn test_zero_budget_skips_everything() {
        let scheduler = RequestScheduler::new(4, Duration::ZERO);
        let requests = vec![ok_request("a", 1), ok_request("b", 1)];

        let outcomes = scheduler.run(requests, None).await;

        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_stays_bounded() {
        let max_workers = 3;
        let scheduler = RequestScheduler::new(max_workers, Duration::from_secs(10));

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let requests: Vec<TrackedRequest> = (0..12)
            .map(|i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                TrackedRequest::new(format!("req-{}", i), async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(Fetched::new(json!(null), 1))
                })
            })
            .collect();

        let outcomes = scheduler.run(requests, None).await;

        assert_eq!(outcomes.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= max_workers);
    }

    #[tokio::test]
    async fn test_progress_advances_by_count() {
        let scheduler = RequestScheduler::new(2, Duration::from_secs(10));
        let bar = ProgressBar::hidden();
        bar.set_length(10);

        let requests = vec![ok_request("a", 3), ok_request("b", 7)];
        scheduler.run(requests, Some(bar.clone())).await;

        assert_eq!(bar.position(), 10);
    }

    #[test]
    fn test_worker_count_clamped() {
        let scheduler = RequestScheduler::new(1000, Duration::from_secs(1));
        assert_eq!(scheduler.max_workers(), workers::MAX_WORKER_COUNT);

        let scheduler = RequestScheduler::new(0, Duration::from_secs(1));
        assert_eq!(scheduler.max_workers(), 1);
    }
}
