//! Circuit breaker data model shared across the workspace.
//!
//! The state machine itself lives in `relaydeck-resilience`; these are the
//! snapshot types it hands out to consumers (and that errors carry when a
//! call is denied).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CircuitState {
    /// Normal operation; calls are permitted.
    #[default]
    Closed,
    /// Failing fast; calls are denied.
    Open,
    /// Probing recovery; one trial call is permitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Snapshot of the breaker's counters and timing.
///
/// At most one of `consecutive_failures`/`consecutive_successes` is non-zero:
/// each outcome resets the opposite counter. Consumers receive copies and
/// never mutate breaker state directly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CircuitBreakerStatus {
    /// Current state of the machine.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// Wall-clock time of the most recent recorded failure.
    pub last_failure_time: Option<SystemTime>,
    /// Wall-clock time of the most recent recorded success.
    pub last_success_time: Option<SystemTime>,
}

/// A state change, delivered to breaker subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitTransition {
    /// State before the change.
    pub from: CircuitState,
    /// State after the change.
    pub to: CircuitState,
    /// When the transition happened.
    pub at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_forms() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }

    #[test]
    fn status_default_is_closed_and_empty() {
        let status = CircuitBreakerStatus::default();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.consecutive_successes, 0);
        assert!(status.last_failure_time.is_none());
    }

    #[test]
    fn status_round_trips_through_json() {
        let status = CircuitBreakerStatus {
            state: CircuitState::HalfOpen,
            consecutive_failures: 0,
            consecutive_successes: 2,
            last_failure_time: None,
            last_success_time: Some(SystemTime::UNIX_EPOCH),
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: CircuitBreakerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, CircuitState::HalfOpen);
        assert_eq!(back.consecutive_successes, 2);
    }
}
