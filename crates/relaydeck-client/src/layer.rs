//! Startup wiring for the whole access layer.
//!
//! The application constructs one [`AccessLayer`] at startup and hands
//! its pieces to the surfaces that need them. Components are explicit,
//! injectable instances — there are no module-level singletons, so tests
//! can build as many isolated layers as they want.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use relaydeck_core::error::ApiResult;
use relaydeck_core::health::HealthState;
use relaydeck_core::traits::{AuthProvider, ConnectivityProbe};
use relaydeck_resilience::circuit_breaker::CircuitBreakerConfig;
use relaydeck_resilience::dedup::DedupConfig;
use relaydeck_resilience::retry::RetryConfig;

use crate::cache::{CacheConfig, OfflineCache, spawn_sweeper};
use crate::fetch::CachedFetcher;
use crate::gateway::{ApiGateway, GatewayConfig};
use crate::health::{HealthConfig, HealthMonitor};

/// Aggregate configuration for the access layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaydeckConfig {
    /// Gateway (transport) settings.
    pub gateway: GatewayConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Circuit breaker thresholds.
    pub circuit: CircuitBreakerConfig,
    /// Request deduplication settings.
    pub dedup: DedupConfig,
    /// Offline cache settings.
    pub cache: CacheConfig,
    /// Health monitor schedule.
    pub health: HealthConfig,
    /// Cache database location; `None` disables persistence.
    pub cache_path: Option<PathBuf>,
}

/// The wired-up access layer: one long-lived instance per component.
pub struct AccessLayer {
    /// Orchestrating gateway.
    pub gateway: ApiGateway,
    /// Offline cache.
    pub cache: OfflineCache,
    /// Cached fetch facade.
    pub fetcher: CachedFetcher,
    /// Health monitor.
    pub monitor: Arc<HealthMonitor>,
    /// Health state receiver for reactive UI binding.
    pub health_rx: tokio::sync::watch::Receiver<HealthState>,
    sweeper: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl AccessLayer {
    /// Wire and start every component.
    pub fn start(
        config: RelaydeckConfig,
        auth: Arc<dyn AuthProvider>,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> ApiResult<Self> {
        let gateway = ApiGateway::new(
            config.gateway,
            config.retry,
            config.circuit,
            config.dedup,
            auth,
        )?;

        let cache = match &config.cache_path {
            Some(path) => OfflineCache::open(path, config.cache.clone()),
            None => OfflineCache::disabled(),
        };
        let sweeper = spawn_sweeper(cache.clone(), config.cache.sweep_interval);

        let fetcher = CachedFetcher::new(gateway.clone(), cache.clone(), Arc::clone(&connectivity));

        let monitor = HealthMonitor::new(gateway.clone(), connectivity, config.health);
        let (health_rx, monitor_task) = monitor.spawn();

        info!("access layer started");
        Ok(Self {
            gateway,
            cache,
            fetcher,
            monitor,
            health_rx,
            sweeper,
            monitor_task,
        })
    }

    /// Stop the background tasks. Component state stays usable.
    pub fn shutdown(&self) {
        self.sweeper.abort();
        self.monitor_task.abort();
        info!("access layer background tasks stopped");
    }
}

impl Drop for AccessLayer {
    fn drop(&mut self) {
        self.sweeper.abort();
        self.monitor_task.abort();
    }
}
