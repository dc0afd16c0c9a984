//! Per-endpoint rate-limit bookkeeping.
//!
//! Every response the API sends carries a remaining-call count and, once the
//! budget is spent, a retry delay. The registry keeps the latest of those per
//! endpoint and answers one question for the dispatcher: may this endpoint
//! be called right now?

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::http::HttpResponse;

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Longest reset delay honoured. Larger server values are clamped to it.
pub const MAX_RESET_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Latest rate-limit information observed for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: i64,
    pub reset_at: Instant,
}

impl RateLimitState {
    pub fn is_throttled(&self, now: Instant) -> bool {
        self.remaining <= 0 && now < self.reset_at
    }
}

/// Endpoint-keyed store of [`RateLimitState`]. Last writer wins.
#[derive(Debug, Default)]
pub struct RateLimitRegistry {
    limits: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_limit(&self, endpoint: &str, remaining: i64, reset_delay: Duration) {
        self.record_limit_at(endpoint, remaining, reset_delay, Instant::now());
    }

    /// Overwrite the record for `endpoint`, resetting `reset_delay` after `now`.
    pub fn record_limit_at(&self, endpoint: &str, remaining: i64, reset_delay: Duration, now: Instant) {
        let reset_delay = reset_delay.min(MAX_RESET_DELAY);
        let state = RateLimitState {
            remaining,
            reset_at: now.checked_add(reset_delay).unwrap_or(now),
        };
        self.limits.lock().insert(endpoint.to_string(), state);
    }

    /// True iff a record exists, its budget is spent and its reset is still ahead.
    /// Endpoints never seen are not throttled.
    pub fn is_throttled(&self, endpoint: &str, now: Instant) -> bool {
        self.limits
            .lock()
            .get(endpoint)
            .is_some_and(|state| state.is_throttled(now))
    }

    pub fn get(&self, endpoint: &str) -> Option<RateLimitState> {
        self.limits.lock().get(endpoint).copied()
    }

    /// Earliest reset among endpoints throttled at `now`.
    pub fn next_reset(&self, now: Instant) -> Option<Instant> {
        self.limits
            .lock()
            .values()
            .filter(|state| state.is_throttled(now))
            .map(|state| state.reset_at)
            .min()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
enum HeaderParseError {
    #[error("header '{0}' is missing")]
    Missing(&'static str),

    #[error("header '{name}' has unparseable value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Extract `(remaining, retry_after)` from a response.
///
/// Missing or malformed values fall back to zero: the endpoint is treated as
/// having no calls left, but with nothing to wait for.
pub fn parse_rate_limit_headers(response: &HttpResponse) -> (i64, Duration) {
    let remaining = parse_remaining(response).unwrap_or_else(|err| {
        if !matches!(err, HeaderParseError::Missing(_)) {
            tracing::debug!(%err, "defaulting remaining calls to 0");
        }
        0
    });
    let retry_after = parse_retry_after(response).unwrap_or_else(|err| {
        if !matches!(err, HeaderParseError::Missing(_)) {
            tracing::debug!(%err, "defaulting retry delay to 0");
        }
        Duration::ZERO
    });
    (remaining, retry_after)
}

fn parse_remaining(response: &HttpResponse) -> Result<i64, HeaderParseError> {
    let value = response
        .header(REMAINING_HEADER)
        .ok_or(HeaderParseError::Missing(REMAINING_HEADER))?;
    value.trim().parse::<i64>().map_err(|_| HeaderParseError::Invalid {
        name: REMAINING_HEADER,
        value: value.to_string(),
    })
}

fn parse_retry_after(response: &HttpResponse) -> Result<Duration, HeaderParseError> {
    let value = response
        .header(RETRY_AFTER_HEADER)
        .ok_or(HeaderParseError::Missing(RETRY_AFTER_HEADER))?;
    let seconds = value.trim().parse::<i64>().map_err(|_| HeaderParseError::Invalid {
        name: RETRY_AFTER_HEADER,
        value: value.to_string(),
    })?;
    // A negative delay means "now".
    Ok(Duration::from_secs(seconds.max(0) as u64).min(MAX_RESET_DELAY))
}
