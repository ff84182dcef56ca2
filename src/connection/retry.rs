// Single retry policy shared by every client call

use crate::error::ClientError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the failed `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }

    /// Delay before the next attempt, or `None` when the error is final.
    ///
    /// Rate-limit responses wait exactly the server-specified delay; bans and
    /// invalid symbols are never retried.
    pub fn next_delay(&self, err: &ClientError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts || !err.is_retryable() {
            return None;
        }
        match err {
            ClientError::RateLimited { retry_after } => Some(*retry_after),
            _ => Some(self.backoff(attempt)),
        }
    }
}
