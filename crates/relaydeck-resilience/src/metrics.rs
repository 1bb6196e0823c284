//! Rolling-window call metrics with on-demand aggregation.
//!
//! The gateway appends one [`ApiCallMetric`] per logical call; UI surfaces
//! read a [`MetricsSummary`] projection whenever they want one. Nothing is
//! aggregated eagerly and the window is bounded, so recording stays cheap
//! on the hot path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use relaydeck_core::metric::{ApiCallMetric, MetricsSummary};

/// Default rolling window capacity.
pub const DEFAULT_WINDOW_CAPACITY: usize = 512;

/// Bounded rolling window of per-call metrics.
#[derive(Debug)]
pub struct MetricsCollector {
    window: Mutex<VecDeque<ApiCallMetric>>,
    capacity: usize,
    total_retries: AtomicU64,
    circuit_breaker_trips: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl MetricsCollector {
    /// Create a collector with the given window capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_retries: AtomicU64::new(0),
            circuit_breaker_trips: AtomicU64::new(0),
        }
    }

    /// Create a collector with the default window capacity.
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Append one call record, evicting the oldest when full.
    pub fn record(&self, metric: ApiCallMetric) {
        self.total_retries
            .fetch_add(u64::from(metric.retry_count), Ordering::Relaxed);

        let mut window = self.window.lock();
        window.push_back(metric);
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    /// Count one breaker trip.
    pub fn record_breaker_trip(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// The most recent `n` call records, newest last.
    pub fn recent(&self, n: usize) -> Vec<ApiCallMetric> {
        let window = self.window.lock();
        window.iter().rev().take(n).rev().cloned().collect()
    }

    /// Compute the read-only summary projection over the current window.
    pub fn summary(&self) -> MetricsSummary {
        let window = self.window.lock();
        let total = window.len();
        let total_retries = self.total_retries.load(Ordering::Relaxed);
        let circuit_breaker_trips = self.circuit_breaker_trips.load(Ordering::Relaxed);

        if total == 0 {
            return MetricsSummary {
                total_retries,
                circuit_breaker_trips,
                ..MetricsSummary::default()
            };
        }

        let mut durations: Vec<u64> = window.iter().map(|m| m.duration_ms).collect();
        durations.sort_unstable();

        let errors = window.iter().filter(|m| is_error(m)).count();
        let cache_hits = window.iter().filter(|m| m.from_cache).count();

        MetricsSummary {
            total_requests: total as u64,
            avg_latency_ms: durations.iter().sum::<u64>() as f64 / total as f64,
            p50_latency_ms: percentile(&durations, 0.50),
            p95_latency_ms: percentile(&durations, 0.95),
            p99_latency_ms: percentile(&durations, 0.99),
            error_rate: errors as f64 / total as f64,
            cache_hit_rate: cache_hits as f64 / total as f64,
            total_retries,
            circuit_breaker_trips,
        }
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[u64], quantile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// A call is an error when it observed a failure status, or failed
/// without one (transport/timeout). Joined duplicate calls without a
/// status are not counted against the backend.
fn is_error(metric: &ApiCallMetric) -> bool {
    match metric.status {
        Some(status) => status >= 400,
        None => !metric.from_cache,
    }
}
