//! Cached fetch facade: write-through population and offline fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relaydeck_client::cache::{CacheConfig, OfflineCache};
use relaydeck_client::fetch::CachedFetcher;
use relaydeck_client::gateway::{ApiGateway, GatewayConfig};
use relaydeck_core::error::ApiError;
use relaydeck_core::scope::{EntityKind, ScopeKey};
use relaydeck_core::traits::{ConnectivityProbe, StaticToken};
use relaydeck_resilience::circuit_breaker::CircuitBreakerConfig;
use relaydeck_resilience::dedup::DedupConfig;
use relaydeck_resilience::retry::RetryConfig;

struct ToggleProbe(AtomicBool);

impl ConnectivityProbe for ToggleProbe {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn test_gateway(server: &MockServer) -> ApiGateway {
    ApiGateway::new(
        GatewayConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(2),
            ..GatewayConfig::default()
        },
        RetryConfig {
            max_retries: 0,
            base_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        },
        CircuitBreakerConfig::default(),
        DedupConfig::default(),
        Arc::new(StaticToken::new("test-token")),
    )
    .unwrap()
}

fn fetcher(server: &MockServer, dir: &TempDir, online: bool) -> (CachedFetcher, Arc<ToggleProbe>) {
    let probe = Arc::new(ToggleProbe(AtomicBool::new(online)));
    let cache = OfflineCache::open(dir.path().join("cache.redb"), CacheConfig::default());
    let fetcher = CachedFetcher::new(test_gateway(server), cache, probe.clone());
    (fetcher, probe)
}

#[tokio::test]
async fn online_fetch_writes_through_to_the_cache() {
    let server = MockServer::start().await;
    let sessions = serde_json::json!([{ "id": "s1" }, { "id": "s2" }]);
    Mock::given(method("GET"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sessions.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (fetcher, _) = fetcher(&server, &dir, true);
    let scope = ScopeKey::branded("t1", "b1");

    let fetched = fetcher
        .fetch(EntityKind::Sessions, &scope, "/agents")
        .await
        .unwrap();
    assert_eq!(fetched, sessions);

    // Write-through: the cache now holds the live response.
    assert_eq!(
        fetcher.cache().get(EntityKind::Sessions, &scope).await,
        Some(sessions)
    );
}

#[tokio::test]
async fn offline_fetch_hydrates_from_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["live"])))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (fetcher, _) = fetcher(&server, &dir, false);
    let scope = ScopeKey::branded("t1", "b1");
    let cached = serde_json::json!([{ "id": "s1" }]);
    fetcher
        .cache()
        .set(EntityKind::Sessions, &scope, &cached, None)
        .await;

    let fetched = fetcher
        .fetch(EntityKind::Sessions, &scope, "/agents")
        .await
        .unwrap();
    assert_eq!(fetched, cached);
}

#[tokio::test]
async fn offline_without_a_cached_copy_fails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (fetcher, _) = fetcher(&server, &dir, false);

    let err = fetcher
        .fetch(EntityKind::Sessions, &ScopeKey::tenant("t1"), "/agents")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
}

#[tokio::test]
async fn network_is_preferred_over_a_populated_cache() {
    let server = MockServer::start().await;
    let live = serde_json::json!(["live"]);
    Mock::given(method("GET"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(live.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (fetcher, _) = fetcher(&server, &dir, true);
    let scope = ScopeKey::tenant("t1");
    fetcher
        .cache()
        .set(EntityKind::Sessions, &scope, &serde_json::json!(["stale"]), None)
        .await;

    let fetched = fetcher
        .fetch(EntityKind::Sessions, &scope, "/agents")
        .await
        .unwrap();
    assert_eq!(fetched, live);
}

#[tokio::test]
async fn connectivity_loss_switches_to_fallback_reads() {
    let server = MockServer::start().await;
    let live = serde_json::json!([{ "id": "s1" }]);
    Mock::given(method("GET"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(live.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (fetcher, probe) = fetcher(&server, &dir, true);
    let scope = ScopeKey::branded("t1", "b1");

    // Populate while online, then drop the network.
    fetcher
        .fetch(EntityKind::Sessions, &scope, "/agents")
        .await
        .unwrap();
    probe.0.store(false, Ordering::Relaxed);

    let fetched = fetcher
        .fetch(EntityKind::Sessions, &scope, "/agents")
        .await
        .unwrap();
    assert_eq!(fetched, live);
}

#[tokio::test]
async fn invalidate_drops_the_fallback_copy() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (fetcher, _) = fetcher(&server, &dir, false);
    let scope = ScopeKey::tenant("t1");
    fetcher
        .cache()
        .set(EntityKind::Brands, &scope, &serde_json::json!(["acme"]), None)
        .await;

    fetcher.invalidate(EntityKind::Brands, &scope).await;

    assert!(
        fetcher
            .fetch(EntityKind::Brands, &scope, "/brands")
            .await
            .is_err()
    );
}
