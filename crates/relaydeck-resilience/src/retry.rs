//! Retry policy: exponential backoff with jitter and typed eligibility.
//!
//! The delay for retry `attempt` is `base * 2^attempt` plus a uniform
//! jitter of up to `jitter_ratio` of the exponential term, capped at
//! `max_delay`. Jitter keeps a fleet of clients from retrying in
//! lockstep after a shared outage.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use relaydeck_core::error::ApiError;

/// Retry configuration for gateway calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries per logical call (attempts = retries + 1).
    pub max_retries: u32,
    /// Base delay of the exponential curve.
    pub base_delay: Duration,
    /// Ceiling for any computed delay.
    pub max_delay: Duration,
    /// Fraction of the exponential term used as the jitter range.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.25,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for latency-sensitive interactive calls: give up sooner,
    /// start retrying faster.
    pub fn for_interactive() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (0-based).
    ///
    /// Saturates instead of overflowing, so any attempt number is safe.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(63)));
        let jitter_ms = (fastrand::f64() * self.jitter_ratio * exponential_ms as f64) as u64;
        let capped_ms = exponential_ms
            .saturating_add(jitter_ms)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped_ms)
    }

    /// Whether a failed attempt should be retried.
    ///
    /// `retry_allowed` carries the method gate: only idempotent-safe
    /// methods retry unless the caller opted in explicitly.
    pub fn should_retry(&self, error: &ApiError, attempt: u32, retry_allowed: bool) -> bool {
        retry_allowed && attempt < self.max_retries && error.is_retryable()
    }
}

/// Whether a method is safe to retry (and deduplicate) without opt-in.
pub fn method_is_idempotent(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET")
        || method.eq_ignore_ascii_case("HEAD")
        || method.eq_ignore_ascii_case("OPTIONS")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_by_jitter_window_and_cap() {
        let config = RetryConfig::default();
        let cap_ms = config.max_delay.as_millis() as u64;

        for attempt in 0..=10 {
            let exponential = 1000u64.saturating_mul(1 << attempt);
            let delay = config.calculate_backoff(attempt).as_millis() as u64;

            assert!(delay <= cap_ms, "attempt {attempt}: {delay}ms over cap");
            if exponential <= cap_ms {
                assert!(delay >= exponential.min(cap_ms), "attempt {attempt}: {delay}ms under floor");
            }
            let uncapped_max = exponential.saturating_add(exponential / 4);
            assert!(
                delay <= uncapped_max.min(cap_ms),
                "attempt {attempt}: {delay}ms over jitter window"
            );
        }
    }

    #[test]
    fn backoff_saturates_on_huge_attempts() {
        let config = RetryConfig::default();
        assert_eq!(config.calculate_backoff(500), config.max_delay);
    }

    #[test]
    fn eligibility_requires_all_three_conditions() {
        let config = RetryConfig::default();
        let retryable = ApiError::Http {
            status: 503,
            message: String::new(),
        };
        let terminal = ApiError::Http {
            status: 404,
            message: String::new(),
        };

        assert!(config.should_retry(&retryable, 0, true));
        assert!(!config.should_retry(&retryable, 0, false));
        assert!(!config.should_retry(&retryable, 3, true));
        assert!(!config.should_retry(&terminal, 0, true));
    }

    #[test]
    fn method_gate_covers_safe_methods_only() {
        assert!(method_is_idempotent("GET"));
        assert!(method_is_idempotent("head"));
        assert!(method_is_idempotent("OPTIONS"));
        assert!(!method_is_idempotent("POST"));
        assert!(!method_is_idempotent("PUT"));
        assert!(!method_is_idempotent("DELETE"));
        assert!(!method_is_idempotent("PATCH"));
    }

    #[test]
    fn interactive_preset_is_tighter() {
        let interactive = RetryConfig::for_interactive();
        let default = RetryConfig::default();
        assert!(interactive.max_retries < default.max_retries);
        assert!(interactive.base_delay < default.base_delay);
    }
}
