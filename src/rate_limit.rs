//! Per-bucket rate limiting for REST calls.
//!
//! DESIGN
//! ======
//! One `tokio::sync::Mutex<BucketState>` per bucket key, created lazily and
//! kept for the life of the process. Holding that lock is the admission
//! permit: requests in one bucket run strictly one at a time, requests in
//! different buckets never wait on each other.
//!
//! Admission, per call:
//! 1. Lock the bucket.
//! 2. Wait out the global throttle, if one is active.
//! 3. Wait until `reset_at` if the bucket's `remaining` quota is 0.
//! 4. Run the request.
//! 5. Fold the response's rate-limit headers into the bucket. A 429 sets
//!    `remaining = 0` and `reset_at = now + retry_after` (and the global
//!    lock when flagged), then the request is retried up to `max_retries`
//!    times through the same admission path.
//! 6. Unlock.
//!
//! A transport error drops the permit without touching the bucket and is
//! returned as-is. Only 429s are retried.
//!
//! The global lock is a plain `Option<Instant>` read without any bucket
//! lock held across it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::bucket::BucketKey;
use crate::error::Error;
use crate::http::HttpResponse;

/// Back-off used when a 429 carries neither `Retry-After` nor a reset hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";
const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
const HEADER_GLOBAL: &str = "x-ratelimit-global";
const HEADER_RETRY_AFTER: &str = "retry-after";

// =============================================================================
// HEADERS
// =============================================================================

/// Rate-limit information carried by one response.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// Time until the window resets.
    pub reset_after: Option<Duration>,
    /// The limit hit applies to every bucket.
    pub global: bool,
    /// Authoritative wait on a 429.
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        Self::parse_at(headers, SystemTime::now())
    }

    /// Parse with an explicit wall-clock time, used to turn the absolute
    /// `X-RateLimit-Reset` epoch into a relative wait.
    fn parse_at(headers: &HeaderMap, now: SystemTime) -> Self {
        let reset_after = header_str(headers, HEADER_RESET_AFTER)
            .and_then(parse_seconds)
            .or_else(|| {
                let reset_epoch = header_str(headers, HEADER_RESET)?.parse::<f64>().ok()?;
                let now_epoch = now.duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
                Some(parse_seconds_f64(reset_epoch - now_epoch).unwrap_or(Duration::ZERO))
            });

        Self {
            remaining: header_str(headers, HEADER_REMAINING).and_then(|v| v.parse().ok()),
            reset_after,
            global: header_str(headers, HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            retry_after: header_str(headers, HEADER_RETRY_AFTER).and_then(parse_seconds),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    parse_seconds_f64(raw.parse().ok()?)
}

fn parse_seconds_f64(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

// =============================================================================
// BUCKET STATE
// =============================================================================

#[derive(Debug, Default)]
struct BucketState {
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

impl BucketState {
    /// When the bucket is exhausted and its window has not reset yet.
    fn blocked_until(&self, now: Instant) -> Option<Instant> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) if reset_at > now => Some(reset_at),
            _ => None,
        }
    }
}

struct Shared {
    buckets: Mutex<HashMap<BucketKey, Arc<AsyncMutex<BucketState>>>>,
    global_until: Mutex<Option<Instant>>,
}

impl Shared {
    fn global_until(&self) -> Option<Instant> {
        *self.global_until.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_global_until(&self, until: Instant) {
        let mut global = self.global_until.lock().unwrap_or_else(PoisonError::into_inner);
        if global.is_none_or(|current| until > current) {
            *global = Some(until);
        }
    }
}

// =============================================================================
// PERMIT
// =============================================================================

/// Exclusive admission to one bucket. Dropping it releases the bucket.
pub struct BucketPermit {
    key: BucketKey,
    state: OwnedMutexGuard<BucketState>,
    shared: Arc<Shared>,
}

impl BucketPermit {
    #[must_use]
    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    /// Fold a response's status and headers into the bucket.
    pub fn record(&mut self, status: StatusCode, headers: &RateLimitHeaders) {
        self.record_at(status, headers, Instant::now());
    }

    fn record_at(&mut self, status: StatusCode, headers: &RateLimitHeaders, now: Instant) {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = headers
                .retry_after
                .or(headers.reset_after)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            self.state.remaining = Some(0);
            self.state.reset_at = Some(now + wait);
            if headers.global {
                self.shared.lock_global_until(now + wait);
            }
            warn!(
                bucket = %self.key,
                retry_after_ms = wait.as_millis(),
                global = headers.global,
                "rate limit: 429 received, backing off"
            );
            return;
        }

        if let Some(remaining) = headers.remaining {
            self.state.remaining = Some(remaining);
        }
        if let Some(reset_after) = headers.reset_after {
            self.state.reset_at = Some(now + reset_after);
        }
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
    max_retries: u32,
}

impl RateLimiter {
    /// `max_retries` is how many times a 429 response is retried.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                buckets: Mutex::new(HashMap::new()),
                global_until: Mutex::new(None),
            }),
            max_retries,
        }
    }

    /// Wait for exclusive admission to `key`'s bucket.
    pub async fn acquire(&self, key: &BucketKey) -> BucketPermit {
        let bucket = self.bucket(key);
        let state = bucket.lock_owned().await;

        while let Some(until) = self.shared.global_until().filter(|t| *t > Instant::now()) {
            debug!(bucket = %key, "rate limit: waiting on global throttle");
            sleep_until(until).await;
        }

        if let Some(until) = state.blocked_until(Instant::now()) {
            debug!(
                bucket = %key,
                wait_ms = until.saturating_duration_since(Instant::now()).as_millis(),
                "rate limit: bucket exhausted, waiting for reset"
            );
            sleep_until(until).await;
        }

        BucketPermit {
            key: key.clone(),
            state,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run `attempt` under `key`'s admission protocol.
    ///
    /// A 429 is retried up to `max_retries` times; the last response is
    /// returned whatever its status.
    ///
    /// # Errors
    ///
    /// Returns the attempt's own error unchanged. Transport errors are never
    /// retried.
    pub async fn execute<F, Fut>(&self, key: &BucketKey, mut attempt: F) -> Result<HttpResponse, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, Error>>,
    {
        let mut retries_left = self.max_retries;
        loop {
            let mut permit = self.acquire(key).await;
            let response = attempt().await?;
            permit.record(response.status, &RateLimitHeaders::parse(&response.headers));
            drop(permit);

            if response.status == StatusCode::TOO_MANY_REQUESTS && retries_left > 0 {
                retries_left -= 1;
                debug!(bucket = %key, retries_left, "rate limit: retrying after 429");
                continue;
            }
            return Ok(response);
        }
    }

    /// True while a global throttle is in force.
    #[must_use]
    pub fn is_globally_limited(&self) -> bool {
        self.shared
            .global_until()
            .is_some_and(|until| until > Instant::now())
    }

    fn bucket(&self, key: &BucketKey) -> Arc<AsyncMutex<BucketState>> {
        let mut buckets = self
            .shared
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(key.clone()).or_default())
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
