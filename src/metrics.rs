use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::FetchErrorKind;
use crate::fetch::{AttemptOutcome, FetchAttempt};

/// Run-scoped counters. Owned by the orchestrator and shared with the
/// fetch client; read through `snapshot()`.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    connection_failures: AtomicU64,
    client_errors: AtomicU64,
    rate_limited: AtomicU64,
    server_errors: AtomicU64,
    /// Failures that are not a wire outcome: bad URL, cancellation.
    other_failures: AtomicU64,
    exhausted: AtomicU64,
    bytes_downloaded: AtomicU64,
    fetch_millis: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub connection_failures: u64,
    pub client_errors: u64,
    pub rate_limited: u64,
    pub server_errors: u64,
    pub other_failures: u64,
    pub exhausted: u64,
    pub bytes_downloaded: u64,
    pub fetch_millis: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, attempt: &FetchAttempt) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if attempt.attempt > 1 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
        self.fetch_millis
            .fetch_add(attempt.elapsed.as_millis() as u64, Ordering::Relaxed);

        match &attempt.outcome {
            AttemptOutcome::Success { bytes, .. } => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.bytes_downloaded.fetch_add(*bytes, Ordering::Relaxed);
            }
            AttemptOutcome::Failure(kind) => {
                let counter = match kind {
                    FetchErrorKind::Timeout => &self.timeouts,
                    FetchErrorKind::ConnectionFailed(_) => &self.connection_failures,
                    FetchErrorKind::RateLimited => &self.rate_limited,
                    FetchErrorKind::ServerError(_) => &self.server_errors,
                    FetchErrorKind::ClientError(_) => &self.client_errors,
                    FetchErrorKind::InvalidUrl(_)
                    | FetchErrorKind::Exhausted(_)
                    | FetchErrorKind::Cancelled => &self.other_failures,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: load(&self.requests),
            successes: load(&self.successes),
            retries: load(&self.retries),
            timeouts: load(&self.timeouts),
            connection_failures: load(&self.connection_failures),
            client_errors: load(&self.client_errors),
            rate_limited: load(&self.rate_limited),
            server_errors: load(&self.server_errors),
            other_failures: load(&self.other_failures),
            exhausted: load(&self.exhausted),
            bytes_downloaded: load(&self.bytes_downloaded),
            fetch_millis: load(&self.fetch_millis),
        }
    }
}

impl MetricsSnapshot {
    pub fn failures(&self) -> u64 {
        self.timeouts
            + self.connection_failures
            + self.client_errors
            + self.rate_limited
            + self.server_errors
            + self.other_failures
    }

    pub fn mean_fetch_millis(&self) -> u64 {
        if self.requests == 0 {
            0
        } else {
            self.fetch_millis / self.requests
        }
    }

    pub fn print(&self) {
        println!("\n=== Fetch Stats ===");
        println!("  requests:        {}", self.requests);
        println!("  successes:       {}", self.successes);
        println!("  retries:         {}", self.retries);
        println!(
            "  failures:        {} (timeout {}, connect {}, 4xx {}, 429 {}, 5xx {}, other {})",
            self.failures(),
            self.timeouts,
            self.connection_failures,
            self.client_errors,
            self.rate_limited,
            self.server_errors,
            self.other_failures
        );
        println!("  exhausted:       {}", self.exhausted);
        println!("  bytes:           {}", self.bytes_downloaded);
        println!("  mean fetch (ms): {}", self.mean_fetch_millis());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn attempt(n: u32, outcome: AttemptOutcome, ms: u64) -> FetchAttempt {
        FetchAttempt {
            url: "https://www.aerolopa.com/ca".into(),
            attempt: n,
            outcome,
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn snapshot_reflects_recorded_attempts() {
        let metrics = Metrics::new();
        metrics.record(&attempt(1, AttemptOutcome::Failure(FetchErrorKind::Timeout), 100));
        metrics.record(&attempt(2, AttemptOutcome::Failure(FetchErrorKind::ServerError(502)), 50));
        metrics.record(&attempt(3, AttemptOutcome::Success { status: 200, bytes: 2048 }, 150));

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.server_errors, 1);
        assert_eq!(snap.failures(), 2);
        assert_eq!(snap.bytes_downloaded, 2048);
        assert_eq!(snap.mean_fetch_millis(), 100);
    }

    #[test]
    fn only_http_4xx_counts_as_client_error() {
        let metrics = Metrics::new();
        metrics.record(&attempt(1, AttemptOutcome::Failure(FetchErrorKind::ClientError(404)), 10));
        metrics.record(&attempt(1, AttemptOutcome::Failure(FetchErrorKind::InvalidUrl("x".into())), 0));
        metrics.record(&attempt(
            3,
            AttemptOutcome::Failure(FetchErrorKind::Exhausted(Box::new(FetchErrorKind::Timeout))),
            0,
        ));
        metrics.record(&attempt(2, AttemptOutcome::Failure(FetchErrorKind::Cancelled), 0));

        let snap = metrics.snapshot();
        assert_eq!(snap.client_errors, 1);
        assert_eq!(snap.other_failures, 3);
        assert_eq!(snap.failures(), 4);
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap, MetricsSnapshot::default());
        assert_eq!(snap.mean_fetch_millis(), 0);
    }
}
