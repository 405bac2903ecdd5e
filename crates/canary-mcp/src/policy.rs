//! Connection timing and buffering policy

use std::time::Duration;

/// Timeouts, retry budget and buffer sizes for tool-server connections
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPolicy {
    /// Handshake attempts per connect cycle (initial connect or reconnect)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff delay
    pub max_backoff: Duration,
    /// Deadline for one handshake attempt, catalog exchange included
    pub handshake_timeout: Duration,
    /// Deadline for closing one session
    pub close_timeout: Duration,
    /// Capacity of each connection's notification channel
    pub notification_buffer: usize,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            notification_buffer: 128,
        }
    }
}

impl ConnectionPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `attempt` failed
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ConnectionPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn prop_backoff_is_monotonic_and_capped(
            initial_ms in 1u64..1_000,
            max_ms in 1u64..60_000,
            attempt in 1u32..64,
        ) {
            let policy = ConnectionPolicy {
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(max_ms),
                ..Default::default()
            };
            let delay = policy.backoff_after(attempt);
            prop_assert!(delay <= policy.max_backoff);
            prop_assert!(delay <= policy.backoff_after(attempt + 1));
        }
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let policy = ConnectionPolicy::default();
        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(3));
        assert!(!policy.allows_retry_after(4));
    }
}
