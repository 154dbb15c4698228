//! Outbound HTTP for source adapters.
//!
//! Every fetch holds a global slot and a per-source slot, optionally waits on a
//! shared request-rate limiter, then retries throttling and server failures.
//! A `Retry-After` hint from the source replaces the exponential delay; a hint
//! longer than the policy ceiling ends the attempt so the next sync cycle picks
//! the source up again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jobfeed_core::FailureClass;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// LinkedIn answers scraping it refuses with this non-standard status.
pub const ACCESS_DENIED_STATUS: u16 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Backoff,
    Wait(Duration),
    GiveUp,
}

/// Seconds form of `Retry-After`; HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub fn retry_for_status(status: StatusCode, hint: Option<Duration>) -> RetryDecision {
    let throttled = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    );
    match hint {
        Some(wait) if throttled => RetryDecision::Wait(wait),
        _ if throttled || status.is_server_error() => RetryDecision::Backoff,
        _ => RetryDecision::GiveUp,
    }
}

pub fn retry_for_transport(err: &reqwest::Error) -> RetryDecision {
    if err.is_timeout() || err.is_connect() {
        RetryDecision::Backoff
    } else {
        RetryDecision::GiveUp
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: usize,
    pub base_delay: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
            ceiling: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`, or `None` to stop.
    pub fn delay(&self, attempt: usize, decision: RetryDecision) -> Option<Duration> {
        if attempt >= self.retries {
            return None;
        }
        match decision {
            RetryDecision::GiveUp => None,
            RetryDecision::Wait(hint) => (hint <= self.ceiling).then_some(hint),
            RetryDecision::Backoff => {
                let factor = u32::try_from(attempt)
                    .ok()
                    .and_then(|shift| 1u32.checked_shl(shift))
                    .unwrap_or(u32::MAX);
                Some(self.base_delay.saturating_mul(factor).min(self.ceiling))
            }
        }
    }
}

/// Concurrent requests allowed per source id.
#[derive(Debug, Clone)]
pub struct SourceLimits {
    pub default: usize,
    pub overrides: HashMap<String, usize>,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            default: 2,
            overrides: HashMap::new(),
        }
    }
}

impl SourceLimits {
    pub fn with(mut self, source_id: impl Into<String>, limit: usize) -> Self {
        self.overrides.insert(source_id.into(), limit);
        self
    }

    pub fn limit_for(&self, source_id: &str) -> usize {
        self.overrides
            .get(source_id)
            .copied()
            .unwrap_or(self.default)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub burst: u32,
    pub interval: Duration,
}

impl RateLimit {
    /// `requests` per minute, bursting up to `requests`.
    pub fn per_minute(requests: u32) -> Option<Self> {
        (requests > 0).then(|| Self {
            burst: requests,
            interval: (Duration::from_secs(60) / requests).max(Duration::from_nanos(1)),
        })
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    stamp: Instant,
}

/// Token bucket shared by every source.
#[derive(Debug)]
pub struct RequestRateLimiter {
    limit: RateLimit,
    bucket: Mutex<Bucket>,
}

impl RequestRateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            bucket: Mutex::new(Bucket {
                tokens: limit.burst,
                stamp: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let interval = self.limit.interval.as_nanos().max(1);
        let earned = now.saturating_duration_since(bucket.stamp).as_nanos() / interval;
        if earned == 0 {
            return;
        }
        let earned = u32::try_from(earned).unwrap_or(u32::MAX);
        bucket.tokens = bucket.tokens.saturating_add(earned).min(self.limit.burst);
        // Keep the fractional interval unless the bucket is full.
        bucket.stamp = if bucket.tokens == self.limit.burst {
            now
        } else {
            self.limit
                .interval
                .checked_mul(earned)
                .and_then(|spent| bucket.stamp.checked_add(spent))
                .unwrap_or(now)
        };
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                self.refill(&mut bucket, now);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                (bucket.stamp + self.limit.interval).saturating_duration_since(now)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub per_source: SourceLimits,
    pub retry: RetryPolicy,
    pub rate_limit: Option<RateLimit>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 8,
            per_source: SourceLimits::default(),
            retry: RetryPolicy::default(),
            rate_limit: None,
        }
    }
}

/// A GET request with optional query parameters and extra headers.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("source refused access to {url}")]
    Denied { url: String },
    #[error("fetcher is shutting down")]
    Closed,
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Request(_) | FetchError::HttpStatus { .. } => FailureClass::Transport,
            FetchError::Denied { .. } | FetchError::Closed => FailureClass::Unavailable,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    limits: SourceLimits,
    sources: Mutex<HashMap<String, Arc<Semaphore>>>,
    rate: Option<RequestRateLimiter>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(Self {
            client: builder.build().context("building http client")?,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            limits: config.per_source,
            sources: Mutex::new(HashMap::new()),
            rate: config.rate_limit.map(RequestRateLimiter::new),
            retry: config.retry,
        })
    }

    async fn source_slots(&self, source_id: &str) -> Arc<Semaphore> {
        let mut sources = self.sources.lock().await;
        if let Some(slots) = sources.get(source_id) {
            return Arc::clone(slots);
        }
        let slots = Arc::new(Semaphore::new(self.limits.limit_for(source_id)));
        sources.insert(source_id.to_string(), Arc::clone(&slots));
        slots
    }

    pub async fn fetch(
        &self,
        run_id: Uuid,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let _in_flight = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let slots = self.source_slots(source_id).await;
        let _slot = slots.acquire().await.map_err(|_| FetchError::Closed)?;
        if let Some(rate) = &self.rate {
            rate.acquire().await;
        }

        let span = info_span!("http_fetch", %run_id, source_id, url = %request.url);
        self.fetch_with_retries(request).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let (error, decision) = match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
            let Some(delay) = self.retry.delay(attempt, decision) else {
                debug!(attempt, ?decision, "not retrying fetch");
                return Err(error);
            };
            warn!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying fetch"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, (FetchError, RetryDecision)> {
        let mut builder = self.client.get(&request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|err| {
            let decision = retry_for_transport(&err);
            (FetchError::Request(err), decision)
        })?;
        let status = response.status();
        let final_url = response.url().to_string();

        if status.is_success() {
            let body = response.bytes().await.map_err(|err| {
                let decision = retry_for_transport(&err);
                (FetchError::Request(err), decision)
            })?;
            return Ok(FetchedResponse {
                status,
                final_url,
                body: body.to_vec(),
            });
        }

        if status.as_u16() == ACCESS_DENIED_STATUS {
            return Err((FetchError::Denied { url: final_url }, RetryDecision::GiveUp));
        }
        let decision = retry_for_status(status, retry_after(response.headers()));
        Err((
            FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            },
            decision,
        ))
    }
}
