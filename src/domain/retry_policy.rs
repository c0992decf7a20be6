//! Retry policy shared by every fetch call site

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::failure::ResponseClass;

/// Attempt ceiling, backoff window and retryable response classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total requests per entry within one fetch invocation
    pub max_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    /// Classes that trigger a backoff and another attempt
    pub retry_on: Vec<ResponseClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_min_ms: 1_000,
            backoff_max_ms: 15_000,
            retry_on: vec![ResponseClass::RateLimited],
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt follows `attempt` (1-based) ending in `class`
    #[must_use]
    pub fn should_retry(&self, class: ResponseClass, attempt: u32) -> bool {
        attempt < self.max_attempts && self.retry_on.contains(&class)
    }

    /// Uniform random delay over the backoff window
    #[must_use]
    pub fn backoff_delay(&self) -> Duration {
        let low = self.backoff_min_ms.min(self.backoff_max_ms);
        let high = self.backoff_min_ms.max(self.backoff_max_ms);
        Duration::from_millis(fastrand::u64(low..=high))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be greater than 0".to_string());
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err("retry.backoff_min_ms cannot be greater than retry.backoff_max_ms".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_only_retries_rate_limits() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(ResponseClass::RateLimited, 1));
        assert!(policy.should_retry(ResponseClass::RateLimited, 4));
        assert!(!policy.should_retry(ResponseClass::RateLimited, 5));
        assert!(!policy.should_retry(ResponseClass::OtherFailure, 1));
        assert!(!policy.should_retry(ResponseClass::NotFound, 1));
    }

    #[test]
    fn backoff_stays_inside_window() {
        let policy = RetryPolicy {
            backoff_min_ms: 10,
            backoff_max_ms: 20,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.backoff_delay();
            assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn rejects_inverted_window() {
        let policy = RetryPolicy {
            backoff_min_ms: 30,
            backoff_max_ms: 20,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
