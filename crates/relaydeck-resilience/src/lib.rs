//! Resilience primitives for the Relaydeck access layer.
//!
//! Everything the API gateway consults around a network call lives here:
//!
//! ```text
//! relaydeck-resilience/
//! ├── circuit_breaker.rs  # Three-state breaker with lazy half-open probing
//! ├── retry.rs            # Exponential backoff with jitter + eligibility policy
//! ├── dedup.rs            # In-flight request collapsing via shared futures
//! └── metrics.rs          # Rolling window of per-call metrics
//! ```
//!
//! The components are deliberately independent: the breaker knows nothing
//! about HTTP, the deduplicator knows nothing about the breaker, and the
//! metrics window is append-only. The gateway in `relaydeck-client` wires
//! them together per call.
//!
//! ## Quick start
//!
//! ```rust
//! use relaydeck_resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig};
//!
//! let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! assert!(breaker.is_call_permitted());
//!
//! let retry = RetryConfig::default();
//! let delay = retry.calculate_backoff(0); // ~1s with jitter
//! assert!(delay.as_millis() >= 1000);
//! ```

pub mod circuit_breaker;
pub mod dedup;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use dedup::{DedupConfig, DedupStats, RequestDeduplicator};
pub use metrics::MetricsCollector;
pub use retry::{RetryConfig, method_is_idempotent};
