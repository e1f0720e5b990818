// ABOUTME: Retry policy for primitive step invocations
// ABOUTME: Exponential backoff with a delay cap, applied only to transient step errors

use std::time::Duration;

use super::error::StepError;
use crate::parser::RetrySettings;

pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &RetrySettings, max_delay: Duration) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay,
            backoff_multiplier: settings.backoff_multiplier,
            max_delay,
        }
    }

    /// Create a retry policy with exponential backoff
    pub fn exponential_backoff(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier: multiplier,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    /// Create a retry policy with fixed delay
    pub fn fixed_delay(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            backoff_multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Calculate delay before retry number `retry` (0-indexed)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let delay_ms =
            (self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32)) as u64;
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Whether another attempt should follow `attempt` (1-indexed) failing with `error`.
    pub fn should_retry(&self, attempt: u32, error: &StepError) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_calculation() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        };

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));

        let capped = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(600),
        };
        assert_eq!(capped.calculate_delay(2), Duration::from_millis(600));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let policy = RetryPolicy::fixed_delay(3, Duration::from_millis(10));
        let transport = StepError::Transport {
            message: "reset".into(),
        };
        let missing = StepError::CapabilityNotFound {
            capability_id: "x".into(),
        };

        assert!(policy.should_retry(1, &transport));
        assert!(policy.should_retry(2, &transport));
        assert!(!policy.should_retry(3, &transport));
        assert!(!policy.should_retry(1, &missing));
        assert!(!RetryPolicy::none().should_retry(1, &transport));
    }

    #[test]
    fn test_from_settings() {
        let settings = RetrySettings {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            backoff_multiplier: 3.0,
        };
        let policy = RetryPolicy::from_settings(&settings, Duration::from_millis(200));
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(150));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));

        let exponential = RetryPolicy::exponential_backoff(2, Duration::from_secs(1), 2.0);
        assert_eq!(exponential.max_delay, DEFAULT_MAX_RETRY_DELAY);
    }
}
