//! Cached fetch facade: network-first with offline cache fallback.
//!
//! Every successful network response populates the cache (write-through).
//! The cache is only read when the device is offline — it is a fallback
//! path, not a read-through cache; the network always wins when
//! reachable.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use relaydeck_core::error::{ApiError, ApiResult};
use relaydeck_core::scope::{EntityKind, ScopeKey};
use relaydeck_core::traits::ConnectivityProbe;

use crate::cache::OfflineCache;
use crate::gateway::{ApiGateway, RequestOptions};

/// Scoped entity fetcher combining the gateway and the offline cache.
#[derive(Clone)]
pub struct CachedFetcher {
    gateway: ApiGateway,
    cache: OfflineCache,
    connectivity: Arc<dyn ConnectivityProbe>,
}

impl CachedFetcher {
    /// Build a fetcher over an existing gateway and cache.
    pub fn new(
        gateway: ApiGateway,
        cache: OfflineCache,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self {
            gateway,
            cache,
            connectivity,
        }
    }

    /// Fetch a scoped entity collection.
    ///
    /// Online: live fetch, then write-through to the cache. Offline:
    /// hydrate from the cache, or fail with a transport error when no
    /// cached copy exists.
    pub async fn fetch(
        &self,
        kind: EntityKind,
        scope: &ScopeKey,
        path: &str,
    ) -> ApiResult<Value> {
        self.fetch_with_ttl(kind, scope, path, None).await
    }

    /// [`fetch`](Self::fetch) with an explicit cache TTL.
    pub async fn fetch_with_ttl(
        &self,
        kind: EntityKind,
        scope: &ScopeKey,
        path: &str,
        ttl: Option<Duration>,
    ) -> ApiResult<Value> {
        if !self.connectivity.is_online() {
            if let Some(cached) = self.cache.get(kind, scope).await {
                debug!(%kind, %scope, "serving cached entities while offline");
                return Ok(cached);
            }
            warn!(%kind, %scope, "offline with no cached copy");
            return Err(ApiError::Transport(
                "device is offline and no cached copy exists".into(),
            ));
        }

        let value: Value = self
            .gateway
            .request(path, RequestOptions::default())
            .await?;
        self.cache.set(kind, scope, &value, ttl).await;
        Ok(value)
    }

    /// Drop the cached copy for one scope, e.g. after a local mutation.
    pub async fn invalidate(&self, kind: EntityKind, scope: &ScopeKey) {
        self.cache.invalidate(kind, scope).await;
    }

    /// The underlying gateway, for calls outside the cached pattern.
    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    /// The underlying cache.
    pub fn cache(&self) -> &OfflineCache {
        &self.cache
    }
}

impl std::fmt::Debug for CachedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFetcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
