//! Leaky-bucket admission control keyed by caller fingerprint.
//!
//! Each bucket holds `limit` drops and leaks `limit` drops per minute. A
//! request adds one drop; a request that would overflow the bucket is
//! rejected without consuming capacity. The decayed level is persisted on
//! every call, accepted or not.

use anyhow::{Context, Result};
use axum::http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue};
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::{clock::Clock, store::BucketStore};

const LEAK_WINDOW_SECONDS: f64 = 60.0;
const EPSILON: f64 = 1e-9;

pub const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Independent bucket namespaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitClass {
    Public,
    Auth,
    Private,
}

impl RateLimitClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Auth => "auth",
            Self::Private => "private",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BucketState {
    pub level: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: f64,
    /// Seconds until the bucket is empty.
    pub reset_seconds: f64,
    /// Seconds until one drop of capacity frees up; zero when allowed.
    pub retry_after_seconds: f64,
}

impl RateLimitOutcome {
    #[must_use]
    pub fn remaining_whole(&self) -> u64 {
        float_to_u64(self.remaining.floor())
    }

    #[must_use]
    pub fn reset_whole(&self) -> u64 {
        float_to_u64(self.reset_seconds.ceil())
    }

    /// Caller-facing wait, never below one second.
    #[must_use]
    pub fn retry_after_whole(&self) -> u64 {
        float_to_u64(self.retry_after_seconds.ceil()).max(1)
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(HEADER_LIMIT, HeaderValue::from(self.limit));
        headers.insert(HEADER_REMAINING, HeaderValue::from(self.remaining_whole()));
        headers.insert(HEADER_RESET, HeaderValue::from(self.reset_whole()));
        if !self.allowed {
            headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_whole()));
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn float_to_u64(value: f64) -> u64 {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        value as u64
    }
}

/// Stable bucket key for `caller` within `class`.
#[must_use]
pub fn fingerprint(class: RateLimitClass, caller: &str) -> String {
    let digest = Sha256::digest(format!("{}:{caller}", class.as_str()).as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// One leaky-bucket step: leak since the last update, then try to add a drop.
#[must_use]
pub fn admit(
    previous: Option<BucketState>,
    limit: u32,
    now: DateTime<Utc>,
) -> (BucketState, RateLimitOutcome) {
    let capacity = f64::from(limit);

    let (level, updated_at) = match previous {
        Some(bucket) => {
            #[allow(clippy::cast_precision_loss)]
            let elapsed = (now - bucket.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
            let leaked = elapsed * capacity / LEAK_WINDOW_SECONDS;
            (
                (bucket.level - leaked).max(0.0),
                bucket.updated_at.max(now),
            )
        }
        None => (0.0, now),
    };
    let state = |level| BucketState { level, updated_at };

    if limit == 0 {
        let outcome = RateLimitOutcome {
            allowed: true,
            limit,
            remaining: 0.0,
            reset_seconds: 0.0,
            retry_after_seconds: 0.0,
        };
        return (state(level), outcome);
    }

    let seconds_per_drop = LEAK_WINDOW_SECONDS / capacity;
    if level + 1.0 <= capacity + EPSILON {
        let level = (level + 1.0).min(capacity);
        let outcome = RateLimitOutcome {
            allowed: true,
            limit,
            remaining: (capacity - level).max(0.0),
            reset_seconds: level * seconds_per_drop,
            retry_after_seconds: 0.0,
        };
        (state(level), outcome)
    } else {
        let outcome = RateLimitOutcome {
            allowed: false,
            limit,
            remaining: (capacity - level).max(0.0),
            reset_seconds: level * seconds_per_drop,
            retry_after_seconds: (level + 1.0 - capacity) * seconds_per_drop,
        };
        (state(level), outcome)
    }
}

pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Leak, then try to admit one request for `fingerprint`.
    ///
    /// # Errors
    /// Returns an error when the bucket store fails; callers must treat this
    /// as a fatal error, not as a rejection.
    pub async fn enforce(&self, fingerprint: &str, limit: u32) -> Result<RateLimitOutcome> {
        let clock = &self.clock;
        let mut outcome = None;
        let mut update = |previous: Option<BucketState>| {
            let (state, result) = admit(previous, limit, clock.now());
            outcome = Some(result);
            state
        };

        let state = self
            .store
            .transact(fingerprint, &mut update)
            .await
            .context("failed to update rate limit bucket")?;

        let outcome = outcome.context("rate limit bucket update was not applied")?;
        debug!(
            allowed = outcome.allowed,
            level = state.level,
            limit,
            "rate limit evaluated"
        );
        Ok(outcome)
    }
}
