//! Per-call metrics and their on-demand aggregation.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One recorded API call.
///
/// Appended to a bounded rolling window by the gateway and never mutated
/// after insertion. `from_cache` marks calls that joined an in-flight
/// deduplicated request instead of hitting the network themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallMetric {
    /// Request path as issued by the caller.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// HTTP status of the outcome, if one was observed.
    pub status: Option<u16>,
    /// Wall-clock duration of the logical call.
    pub duration_ms: u64,
    /// Retries consumed by this call.
    pub retry_count: u32,
    /// Whether the result was shared from an in-flight duplicate.
    pub from_cache: bool,
    /// When the call completed.
    pub timestamp: SystemTime,
}

/// Read-only aggregation over the rolling metrics window.
///
/// Computed on demand; percentiles use the nearest-rank method so the
/// projection is deterministic for a given window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsSummary {
    /// Calls currently represented in the window.
    pub total_requests: u64,
    /// Mean latency across the window.
    pub avg_latency_ms: f64,
    /// Median latency.
    pub p50_latency_ms: u64,
    /// 95th percentile latency.
    pub p95_latency_ms: u64,
    /// 99th percentile latency.
    pub p99_latency_ms: u64,
    /// Fraction of windowed calls that failed.
    pub error_rate: f64,
    /// Fraction of windowed calls served from the deduplicator.
    pub cache_hit_rate: f64,
    /// Retries consumed since startup (not windowed).
    pub total_retries: u64,
    /// Times the circuit breaker tripped open since startup.
    pub circuit_breaker_trips: u64,
}
