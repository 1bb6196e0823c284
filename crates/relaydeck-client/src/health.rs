//! Adaptive health monitoring of backend reachability.
//!
//! Each probe round either succeeds (failure counter resets, next round
//! after the steady interval) or fails (counter increments, next round
//! after an exponential backoff capped at `max_backoff`). While the
//! device is offline at the OS level the schedule collapses to a short
//! fixed interval so recovery is noticed quickly. The scheduling is an
//! explicit three-phase state machine rather than nested timer
//! callbacks, and the delay computation is a pure function.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relaydeck_core::circuit::CircuitState;
use relaydeck_core::health::{BackendComponents, HealthState};
use relaydeck_core::traits::ConnectivityProbe;
use relaydeck_resilience::retry::RetryConfig;

use crate::gateway::ApiGateway;

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Steady-state probe interval while healthy.
    pub interval: Duration,
    /// Fixed cadence while the device is offline.
    pub offline_interval: Duration,
    /// Base of the failure backoff curve.
    pub failure_base: Duration,
    /// Ceiling for the failure backoff.
    pub max_backoff: Duration,
    /// Timeout for one probe round.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            offline_interval: Duration::from_secs(5),
            failure_base: Duration::from_secs(5),
            max_backoff: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Scheduling phase of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    /// No probe running or scheduled.
    Idle,
    /// A probe round is in flight.
    Checking,
    /// Waiting for the next scheduled round.
    Scheduled,
}

/// Delay until the next probe round.
///
/// Offline overrides the curve with a short fixed interval; otherwise
/// failures drive the same exponential-with-jitter formula the retry
/// loop uses, capped at `max_backoff`.
pub fn next_delay(consecutive_failures: u32, is_online: bool, config: &HealthConfig) -> Duration {
    if !is_online {
        return config.offline_interval;
    }
    if consecutive_failures == 0 {
        return config.interval;
    }
    let backoff = RetryConfig {
        base_delay: config.failure_base,
        max_delay: config.max_backoff,
        ..RetryConfig::default()
    };
    backoff.calculate_backoff(consecutive_failures - 1)
}

struct MonitorState {
    phase: MonitorPhase,
    consecutive_failures: u32,
}

/// Periodic reachability monitor driving the gateway's health probes.
pub struct HealthMonitor {
    gateway: ApiGateway,
    connectivity: Arc<dyn ConnectivityProbe>,
    config: HealthConfig,
    state_tx: watch::Sender<HealthState>,
    inner: parking_lot::Mutex<MonitorState>,
}

impl HealthMonitor {
    /// Create a monitor; call [`spawn`](Self::spawn) to start the loop.
    pub fn new(
        gateway: ApiGateway,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: HealthConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(HealthState::default());
        Arc::new(Self {
            gateway,
            connectivity,
            config,
            state_tx,
            inner: parking_lot::Mutex::new(MonitorState {
                phase: MonitorPhase::Idle,
                consecutive_failures: 0,
            }),
        })
    }

    /// Subscribe to health-state updates.
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state_tx.subscribe()
    }

    /// The latest published snapshot.
    pub fn current(&self) -> HealthState {
        self.state_tx.borrow().clone()
    }

    /// Whether the last round found everything healthy.
    pub fn is_healthy(&self) -> bool {
        self.state_tx.borrow().is_healthy
    }

    /// Current scheduling phase.
    pub fn phase(&self) -> MonitorPhase {
        self.inner.lock().phase
    }

    /// Run one probe round now.
    ///
    /// Returns `false` without probing when a round is already in flight;
    /// overlapping checks are suppressed rather than queued.
    pub async fn check_now(&self) -> bool {
        {
            let mut state = self.inner.lock();
            if state.phase == MonitorPhase::Checking {
                debug!("health check already in flight; skipping");
                return false;
            }
            state.phase = MonitorPhase::Checking;
        }

        let is_online = self.connectivity.is_online();
        let mut is_api_reachable = false;
        let mut latency_ms = None;
        let mut components: Option<BackendComponents> = None;
        let mut degraded = false;

        if is_online {
            match tokio::time::timeout(self.config.probe_timeout, self.gateway.ping()).await {
                Ok(Ok(latency)) => {
                    is_api_reachable = true;
                    latency_ms = Some(latency);
                    match self.gateway.detailed_health().await {
                        Ok(report) => {
                            degraded = report.is_degraded();
                            components = Some(report.checks);
                        }
                        Err(err) => {
                            // Reachable but opaque: treat as healthy-enough
                            // rather than flapping on a secondary endpoint.
                            debug!(error = %err, "detailed health unavailable");
                        }
                    }
                }
                Ok(Err(err)) => debug!(error = %err, "health probe failed"),
                Err(_) => debug!("health probe timed out"),
            }
        } else {
            debug!("device offline; skipping network probe");
        }

        let success = is_online && is_api_reachable;
        let consecutive_failures = {
            let mut state = self.inner.lock();
            if success {
                if state.consecutive_failures > 0 {
                    info!("backend reachable again");
                }
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                warn!(
                    failures = state.consecutive_failures,
                    is_online, "health check failed"
                );
            }
            state.phase = MonitorPhase::Idle;
            state.consecutive_failures
        };

        let breaker_closed =
            self.gateway.breaker_status().await.state == CircuitState::Closed;
        let snapshot = HealthState {
            is_online,
            is_api_reachable,
            is_healthy: success && breaker_closed && !degraded,
            consecutive_failures,
            next_retry_in: next_delay(consecutive_failures, is_online, &self.config),
            latency_ms,
            last_checked: Some(SystemTime::now()),
            components,
        };
        self.state_tx.send_replace(snapshot);
        true
    }

    /// Start the monitoring loop.
    ///
    /// Returns the state receiver and the task handle; aborting the handle
    /// stops the loop.
    pub fn spawn(self: &Arc<Self>) -> (watch::Receiver<HealthState>, JoinHandle<()>) {
        let receiver = self.subscribe();
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let round_started = Instant::now();
                monitor.check_now().await;
                let delay = monitor.current().next_retry_in;
                {
                    monitor.inner.lock().phase = MonitorPhase::Scheduled;
                }
                debug!(?delay, elapsed = ?round_started.elapsed(), "next health check scheduled");
                tokio::time::sleep(delay).await;
            }
        });
        (receiver, handle)
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("phase", &self.phase())
            .field("config", &self.config)
            .finish()
    }
}
