//! Polite HTTP GET: throttle, per-attempt timeout, retry with backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, warn};
use url::Url;

use crate::cancel::Cancellation;
use crate::error::{FetchError, FetchErrorKind};
use crate::metrics::Metrics;
use crate::settings::CrawlerSettings;
use crate::throttle::Throttle;

/// What came back over the wire, before status classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connect(String),
}

/// One network round trip. The production impl wraps reqwest; tests script it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { inner })
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.bytes().await.map_err(transport_error)?.to_vec();

        Ok(RawResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Explicit retry policy handed to the client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per fetch, first one included.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Floor applied to the wait after a 429.
    pub rate_limit_delay: Duration,
    /// Ceiling for a server-sent `Retry-After`.
    pub max_retry_after: Duration,
    pub retryable: fn(&FetchErrorKind) -> bool,
}

pub fn default_retryable(kind: &FetchErrorKind) -> bool {
    matches!(
        kind,
        FetchErrorKind::Timeout
            | FetchErrorKind::ConnectionFailed(_)
            | FetchErrorKind::RateLimited
            | FetchErrorKind::ServerError(_)
    )
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&CrawlerSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &CrawlerSettings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            rate_limit_delay: Duration::from_millis(settings.rate_limit_delay_ms),
            max_retry_after: Duration::from_millis(
                settings.max_delay_ms.max(settings.rate_limit_delay_ms),
            ),
            retryable: default_retryable,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): base × multiplier^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    fn delay_after(
        &self,
        attempt: u32,
        kind: &FetchErrorKind,
        retry_after: Option<Duration>,
    ) -> Duration {
        let backoff = self.backoff(attempt);
        match kind {
            FetchErrorKind::RateLimited => backoff
                .max(self.rate_limit_delay)
                .max(retry_after.unwrap_or_default().min(self.max_retry_after)),
            _ => backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { status: u16, bytes: u64 },
    Failure(FetchErrorKind),
}

/// One attempt against one URL. Fed to metrics and logs, never persisted.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub url: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub status: u16,
    pub body: Vec<u8>,
    pub attempts: u32,
}

pub struct FetchClient {
    transport: Arc<dyn Transport>,
    throttle: Arc<Throttle>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    metrics: Arc<Metrics>,
    cancel: Cancellation,
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        throttle: Arc<Throttle>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transport,
            throttle,
            policy,
            attempt_timeout,
            metrics,
            cancel: Cancellation::new(),
        }
    }

    /// Once `cancel` fires, no new attempt starts and retry waits end early.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Production client over reqwest.
    pub fn from_settings(
        settings: &CrawlerSettings,
        throttle: Arc<Throttle>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(&settings.user_agent, settings.timeout())?;
        Ok(Self::new(
            Arc::new(transport),
            throttle,
            RetryPolicy::from_settings(settings),
            settings.timeout(),
            metrics,
        ))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let invalid = |msg: String| FetchError::new(url, FetchErrorKind::InvalidUrl(msg), 0);
        let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| invalid("missing host".into()))?
            .to_string();

        let max = self.policy.max_retries.max(1);
        let mut last = FetchErrorKind::Timeout;

        for attempt in 1..=max {
            let cancelled = || FetchError::new(url, FetchErrorKind::Cancelled, attempt - 1);
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }

            let (result, elapsed) = {
                let acquired = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(cancelled()),
                    permit = self.throttle.acquire(&host) => permit,
                };
                let _permit = acquired.map_err(|e| {
                    FetchError::new(url, FetchErrorKind::ConnectionFailed(e.to_string()), attempt)
                })?;
                let start = Instant::now();
                let result =
                    tokio::time::timeout(self.attempt_timeout, self.transport.get(&parsed)).await;
                (result, start.elapsed())
            };

            let (kind, retry_after) = match result {
                Ok(Ok(resp)) if (200..300).contains(&resp.status) => {
                    self.note(url, attempt, elapsed, AttemptOutcome::Success {
                        status: resp.status,
                        bytes: resp.body.len() as u64,
                    });
                    return Ok(FetchResponse {
                        url: parsed,
                        status: resp.status,
                        body: resp.body,
                        attempts: attempt,
                    });
                }
                Ok(Ok(resp)) => (FetchErrorKind::from_status(resp.status), resp.retry_after),
                Ok(Err(TransportError::Connect(msg))) => {
                    (FetchErrorKind::ConnectionFailed(msg), None)
                }
                Ok(Err(TransportError::Timeout)) | Err(_) => (FetchErrorKind::Timeout, None),
            };
            self.note(url, attempt, elapsed, AttemptOutcome::Failure(kind.clone()));

            if !(self.policy.retryable)(&kind) {
                return Err(FetchError::new(url, kind, attempt));
            }
            if attempt == max {
                last = kind;
                break;
            }

            let delay = self.policy.delay_after(attempt, &kind, retry_after);
            warn!(
                "{} on {} (attempt {}/{}), backing off {:.1}s",
                kind,
                url,
                attempt,
                max,
                delay.as_secs_f64()
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(url, attempt, "cancelled during backoff");
                    return Err(FetchError::new(url, FetchErrorKind::Cancelled, attempt));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.metrics.record_exhausted();
        Err(FetchError::new(url, FetchErrorKind::Exhausted(Box::new(last)), max))
    }

    fn note(&self, url: &str, attempt: u32, elapsed: Duration, outcome: AttemptOutcome) {
        let record = FetchAttempt {
            url: url.to_string(),
            attempt,
            outcome,
            elapsed,
        };
        debug!(
            url = %record.url,
            attempt = record.attempt,
            elapsed_ms = record.elapsed.as_millis() as u64,
            outcome = ?record.outcome,
            "fetch attempt"
        );
        self.metrics.record(&record);
    }
}
