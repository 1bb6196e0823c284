//! Health-state data model and the detailed backend health payload.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Snapshot published by the health monitor after every probe round.
///
/// Superseded snapshots are discarded, not archived; subscribers always
/// observe the latest one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    /// OS-level connectivity as reported by the host shell.
    pub is_online: bool,
    /// Whether the last reachability probe got a 2xx from the backend.
    pub is_api_reachable: bool,
    /// Online, reachable, breaker closed, and no degraded component.
    pub is_healthy: bool,
    /// Probe failures since the last successful round.
    pub consecutive_failures: u32,
    /// Delay until the next scheduled probe.
    pub next_retry_in: Duration,
    /// Round-trip latency of the last successful probe.
    pub latency_ms: Option<u64>,
    /// When the last probe round completed.
    pub last_checked: Option<SystemTime>,
    /// Per-component status from the last successful detailed check.
    pub components: Option<BackendComponents>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            is_online: true,
            is_api_reachable: false,
            is_healthy: false,
            consecutive_failures: 0,
            next_retry_in: Duration::ZERO,
            latency_ms: None,
            last_checked: None,
            components: None,
        }
    }
}

/// Body of the authenticated `GET /health/detailed` endpoint.
///
/// Unknown fields are ignored so backend additions never break parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealthReport {
    /// Per-component checks.
    #[serde(default)]
    pub checks: BackendComponents,
    /// Server-side breaker states, passed through opaquely for diagnostics.
    #[serde(default)]
    pub circuit_breakers: serde_json::Map<String, serde_json::Value>,
    /// The backend's own view of its resilience machinery.
    #[serde(default = "default_true")]
    pub resilience_healthy: bool,
}

impl BackendHealthReport {
    /// Whether any backend component reports trouble.
    pub fn is_degraded(&self) -> bool {
        !self.resilience_healthy || self.checks.is_degraded()
    }
}

/// Per-component status block of the detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendComponents {
    /// Primary database check.
    #[serde(default)]
    pub database: ComponentCheck,
    /// Cache/queue broker check.
    #[serde(default)]
    pub redis: ComponentCheck,
    /// Background queue check.
    #[serde(default)]
    pub queue: ComponentCheck,
}

impl BackendComponents {
    /// Whether any component is below `Ok`.
    pub fn is_degraded(&self) -> bool {
        [&self.database, &self.redis, &self.queue]
            .iter()
            .any(|check| check.status != ComponentStatus::Ok)
    }
}

/// A single component check.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ComponentCheck {
    /// Reported status.
    #[serde(default)]
    pub status: ComponentStatus,
}

/// Status reported for one backend component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is operating normally.
    #[default]
    #[serde(alias = "healthy", alias = "up")]
    Ok,
    /// Component is functional but impaired.
    Degraded,
    /// Component is unavailable.
    #[serde(alias = "unhealthy")]
    Down,
}

fn default_true() -> bool {
    true
}
