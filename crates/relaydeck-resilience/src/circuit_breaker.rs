//! Circuit breaker guarding the API gateway.
//!
//! Tracks consecutive outcomes and exposes a permit/deny decision over a
//! three-state machine (Closed, Open, HalfOpen). All decisions are computed
//! from in-memory counters and monotonic timestamps; the breaker never
//! blocks on I/O. The Open → HalfOpen transition is evaluated lazily on the
//! next permission check, so no background timer is required.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relaydeck_core::circuit::{CircuitBreakerStatus, CircuitState, CircuitTransition};

/// Capacity of each subscriber channel; transitions are dropped rather
/// than ever blocking the breaker.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Cooldown in Open before a half-open trial is permitted.
    pub half_open_timeout: Duration,
    /// Age after which a stale failure count decays back to zero.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for flaky networks: trips faster, probes recovery sooner.
    pub fn for_network() -> Self {
        Self {
            failure_threshold: 3,
            half_open_timeout: Duration::from_secs(15),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker implementation.
///
/// Mutated only through its own methods; the gateway owns it behind a
/// mutex and hands out [`CircuitBreakerStatus`] copies.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<SystemTime>,
    last_success_time: Option<SystemTime>,
    /// Monotonic instant of the last failure, for `reset_timeout` decay.
    last_failure_instant: Option<Instant>,
    /// When the current state was entered.
    last_state_change: Instant,
    subscribers: Vec<mpsc::Sender<CircuitTransition>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            last_success_time: None,
            last_failure_instant: None,
            last_state_change: Instant::now(),
            subscribers: Vec::new(),
        }
    }

    /// Create a circuit breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Whether a call may proceed right now.
    ///
    /// While Open, permission flips to a HalfOpen trial once
    /// `half_open_timeout` has elapsed since the breaker opened.
    pub fn is_call_permitted(&mut self) -> bool {
        self.decay_stale_failures();

        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.last_state_change.elapsed() >= self.config.half_open_timeout {
                    self.transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn on_success(&mut self) {
        self.last_success_time = Some(SystemTime::now());
        self.consecutive_failures = 0;

        match self.state {
            CircuitState::HalfOpen => {
                // The trial call succeeded; service has recovered.
                self.consecutive_successes = 0;
                self.transition(CircuitState::Closed);
            }
            _ => {
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            }
        }
    }

    /// Record a failed call. Returns `true` when this failure tripped the
    /// breaker open.
    pub fn on_error(&mut self) -> bool {
        self.decay_stale_failures();
        self.last_failure_time = Some(SystemTime::now());
        self.last_failure_instant = Some(Instant::now());
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.state {
            CircuitState::Closed
                if self.consecutive_failures >= self.config.failure_threshold =>
            {
                self.transition(CircuitState::Open);
                true
            }
            CircuitState::HalfOpen => {
                // Trial call failed; re-open and restart the cooldown.
                self.transition(CircuitState::Open);
                true
            }
            _ => false,
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Snapshot of counters and timing.
    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
        }
    }

    /// Time spent in the current state.
    pub fn time_in_state(&self) -> Duration {
        self.last_state_change.elapsed()
    }

    /// Subscribe to state transitions.
    ///
    /// Events are delivered best-effort over a bounded channel; a slow
    /// subscriber loses events rather than stalling callers.
    pub fn subscribe(&mut self) -> mpsc::Receiver<CircuitTransition> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    /// Reset the breaker to its initial closed state.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.last_failure_time = None;
        self.last_success_time = None;
        self.last_failure_instant = None;
        self.last_state_change = Instant::now();
    }

    /// Stale failure history must not bias future trips: a non-zero
    /// failure count decays once `reset_timeout` has passed without a
    /// new failure, decoupled from any state transition.
    fn decay_stale_failures(&mut self) {
        if self.state == CircuitState::Closed
            && self.consecutive_failures > 0
            && let Some(last) = self.last_failure_instant
            && last.elapsed() >= self.config.reset_timeout
        {
            debug!(
                count = self.consecutive_failures,
                "stale failure count decayed"
            );
            self.consecutive_failures = 0;
        }
    }

    fn transition(&mut self, to: CircuitState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.last_state_change = Instant::now();

        match to {
            CircuitState::Open => warn!(%from, "circuit breaker opened"),
            CircuitState::HalfOpen => debug!("circuit breaker half-open, permitting trial call"),
            CircuitState::Closed => info!("circuit breaker closed"),
        }

        let event = CircuitTransition {
            from,
            to,
            at: SystemTime::now(),
        };
        self.subscribers.retain(|tx| !tx.is_closed());
        for tx in &self.subscribers {
            let _ = tx.try_send(event);
        }
    }
}
