//! Failure classification and reconnection backoff
//!
//! Only `Retryable` failures (refused connections, timeouts, transient I/O)
//! drive reconnection, with exponential backoff up to a bounded attempt
//! count. Fatal failures (authentication, malformed data) surface
//! immediately and are never retried.

use std::time::Duration;

/// Whether a failure may be retried across sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Reconnection with backoff is allowed
    Retryable,
    /// Terminal; report and stop
    Fatal,
}

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First delay
    pub base: Duration,
    /// Upper bound on any delay
    pub cap: Duration,
    /// Connection attempts after the first failure
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based): base · 2^attempt,
    /// capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence_is_1_2_4() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(5),
            max_attempts: 10,
        };
        assert_eq!(policy.delay(6), Duration::from_secs(5));
        // Shift overflow saturates instead of panicking
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn attempt_budget_is_bounded() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }
}
