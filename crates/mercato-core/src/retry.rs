//! # Retry Policy
//!
//! Bounds for retrying optimistic-concurrency conflicts.
//!
//! ```text
//! attempt 1 ──conflict──► wait 100ms ──► attempt 2 ──conflict──► wait 200ms
//!     ──► attempt 3 ──conflict──► Conflict error (no further wait)
//! ```
//!
//! Only the numbers live here. The ledger turns them into an exponential
//! backoff schedule and does the sleeping, which keeps this crate free of
//! timers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry bounds for conflicting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: u32,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits. Handy for callers that run their own clock.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_three_attempts() {
        let policy = RetryPolicy::default();

        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::immediate(1);
        assert!(!policy.allows_retry_after(1));
        assert_eq!(policy.max_delay, Duration::ZERO);
    }
}
