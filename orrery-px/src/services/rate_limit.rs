//! Per-session rate limiting for AI-backed endpoints
//!
//! Extraction, insight, and briefing requests all reach a paid upstream;
//! each session gets a bounded request budget per minute.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use uuid::Uuid;

/// Requests per minute allowed per session on AI-backed endpoints
const REQUESTS_PER_MINUTE: u32 = 30;

/// Keyed rate limiter over session ids
pub struct SessionRateLimiter {
    inner: DefaultKeyedRateLimiter<Uuid>,
}

impl SessionRateLimiter {
    pub fn new() -> Self {
        let per_minute = NonZeroU32::new(REQUESTS_PER_MINUTE).expect("nonzero quota");
        Self {
            inner: RateLimiter::keyed(Quota::per_minute(per_minute)),
        }
    }

    /// Check a session's budget; Err means the caller should back off
    pub fn check(&self, session_id: Uuid) -> Result<(), ()> {
        self.inner.check_key(&session_id).map_err(|_| ())
    }
}

impl Default for SessionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
