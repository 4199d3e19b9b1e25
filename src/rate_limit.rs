//! Per-connection chat rate limiting.
//!
//! DESIGN
//! ======
//! A minimum-interval gate. The limiter itself is stateless policy; the
//! last accepted send time lives on the connection's session record so the
//! gate is checked and advanced under the hub lock in one step.
//!
//! A send is rejected while `now - last <= min_interval`, so a send landing
//! exactly on the boundary is still rejected. The timestamp only advances on
//! acceptance: a rejected burst does not push the window forward.

use std::time::{Duration, Instant};

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("chat rate limit exceeded (min interval {min_interval_ms}ms, retry in {retry_after_ms}ms)")]
    TooSoon { min_interval_ms: u64, retry_after_ms: u64 },
}

impl crate::frame::ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        "E_RATE_LIMITED"
    }

    fn retryable(&self) -> bool {
        true
    }
}

impl RateLimitError {
    #[must_use]
    pub fn retry_after_ms(&self) -> u64 {
        match self {
            Self::TooSoon { retry_after_ms, .. } => *retry_after_ms,
        }
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    min_interval: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Check the gate against `last` and, on acceptance, record `now` into it.
    ///
    /// # Errors
    ///
    /// Returns `TooSoon` when `now` is within the interval of `last`.
    pub fn check_and_record_at(&self, last: &mut Option<Instant>, now: Instant) -> Result<(), RateLimitError> {
        if let Some(prev) = *last {
            // A clock reading earlier than `prev` saturates to zero elapsed.
            let elapsed = now.saturating_duration_since(prev);
            if elapsed <= self.min_interval {
                let remaining = self.min_interval - elapsed;
                return Err(RateLimitError::TooSoon {
                    min_interval_ms: duration_ms(self.min_interval),
                    retry_after_ms: duration_ms(remaining).max(1),
                });
            }
        }
        *last = Some(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_CHAT_MIN_INTERVAL_MS))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
