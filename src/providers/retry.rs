//! Bounded retry with exponential backoff, shared by both providers.

use std::time::Duration;

/// Retry policy: up to `max_attempts` tries with `2^attempt` seconds between
/// them. Server-side (5xx) and network errors are retryable; client errors
/// and malformed responses are not.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the attempt after `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        // Cap the shift so a misconfigured retry count cannot overflow.
        Duration::from_secs(1u64 << attempt.min(16))
    }

    /// Whether another attempt remains after `attempt` (1-based).
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Only server-side statuses are worth retrying.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        status >= 500
    }

    pub async fn wait(&self, attempt: u32) {
        tokio::time::sleep(self.backoff_delay(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::new(3);
        assert!(policy.has_attempts_left(1));
        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
    }

    #[test]
    fn only_server_errors_are_retryable() {
        let policy = RetryPolicy::new(3);
        assert!(policy.is_retryable_status(500));
        assert!(policy.is_retryable_status(503));
        assert!(!policy.is_retryable_status(400));
        assert!(!policy.is_retryable_status(404));
        assert!(!policy.is_retryable_status(429));
    }

    #[test]
    fn zero_attempt_config_still_runs_once() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts, 1);
    }
}
