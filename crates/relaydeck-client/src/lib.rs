//! Relaydeck client: the resilient remote-API access layer.
//!
//! Every data-fetching operation in the application routes through the
//! [`ApiGateway`] before reaching the network. The gateway consults the
//! circuit breaker, collapses concurrent identical reads through the
//! deduplicator, and runs the retry loop; the [`OfflineCache`] is the
//! fallback path when the device is offline; the [`HealthMonitor`]
//! drives adaptive reachability probing on top of it all.
//!
//! ```text
//! relaydeck-client/
//! ├── gateway.rs  # Per-call orchestration over reqwest
//! ├── cache.rs    # redb-backed offline cache with TTL expiry
//! ├── health.rs   # Adaptive health monitor
//! ├── fetch.rs    # Network-first fetch with offline fallback
//! └── layer.rs    # Startup wiring
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relaydeck_client::{AccessLayer, RelaydeckConfig};
//! use relaydeck_core::traits::{AlwaysOnline, StaticToken};
//!
//! # fn main() -> Result<(), relaydeck_core::ApiError> {
//! let layer = AccessLayer::start(
//!     RelaydeckConfig::default(),
//!     Arc::new(StaticToken::new("token")),
//!     Arc::new(AlwaysOnline),
//! )?;
//! let _summary = layer.gateway.metrics_summary();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod fetch;
pub mod gateway;
pub mod health;
pub mod layer;

pub use cache::{CacheConfig, OfflineCache, spawn_sweeper};
pub use fetch::CachedFetcher;
pub use gateway::{ApiGateway, GatewayConfig, Payload, RequestOptions};
pub use health::{HealthConfig, HealthMonitor, MonitorPhase, next_delay};
pub use layer::{AccessLayer, RelaydeckConfig};
