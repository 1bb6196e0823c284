//! Persistent offline cache over redb, partitioned by entity type.
//!
//! The cache is a thin semantic layer over two redb tables: a data table
//! keyed `(partition, scope)` and an expiry index keyed
//! `(expires_at_ms, partition, scope)`. Expiry is enforced twice: a
//! check on every read (with lazy deletion off the read path) and a
//! periodic sweep that walks the expiry index as an ordered range scan.
//!
//! A store that cannot be opened degrades to a disabled cache: every
//! operation becomes a safe no-op miss instead of failing the caller.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relaydeck_core::scope::{EntityKind, ScopeKey};

/// Cached payloads, keyed by `(partition, scope)`.
const DATA: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("cache_entries");

/// Expiry index, keyed by `(expires_at_ms, partition, scope)` so the
/// sweep is an ordered range scan rather than a full walk.
const EXPIRY: TableDefinition<(u64, &str, &str), ()> = TableDefinition::new("cache_expiry");

/// Offline cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Sweep cadence for proactive expiry cleanup.
    pub sweep_interval: Duration,
    /// Per-entity TTL overrides; kinds fall back to their default tier.
    pub ttl_overrides: HashMap<EntityKind, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5 * 60),
            ttl_overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Effective TTL for a kind.
    pub fn ttl_for(&self, kind: EntityKind) -> Duration {
        self.ttl_overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_ttl())
    }
}

/// Persisted envelope around the cached JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    data: Value,
    created_at_ms: u64,
    expires_at_ms: u64,
}

#[derive(Debug, Error)]
enum StoreError {
    #[error("store error: {0}")]
    Backend(String),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

fn backend_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

enum ReadOutcome {
    Hit(Value),
    Expired,
    Miss,
}

/// TTL-based persistent cache for offline fallback reads.
///
/// All operations are infallible from the caller's perspective: storage
/// trouble is logged and reported as a miss. Writes are last-write-wins.
#[derive(Clone)]
pub struct OfflineCache {
    db: Option<Arc<Database>>,
    config: CacheConfig,
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache")
            .field("enabled", &self.db.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl OfflineCache {
    /// Open or create the cache database at `path`.
    pub fn open(path: impl AsRef<Path>, config: CacheConfig) -> Self {
        match Self::open_db(path.as_ref()) {
            Ok(db) => {
                debug!(path = %path.as_ref().display(), "offline cache opened");
                Self {
                    db: Some(Arc::new(db)),
                    config,
                }
            }
            Err(err) => {
                warn!(%err, "offline cache unavailable; operating in pass-through mode");
                Self { db: None, config }
            }
        }
    }

    /// A cache with no backing store; all reads miss, all writes succeed.
    pub fn disabled() -> Self {
        Self {
            db: None,
            config: CacheConfig::default(),
        }
    }

    /// Whether a backing store is attached.
    pub fn is_enabled(&self) -> bool {
        self.db.is_some()
    }

    /// Configured sweep cadence.
    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }

    /// Look up a scoped entry, treating expired entries as misses.
    ///
    /// An expired-but-present entry is deleted lazily off the read path;
    /// the read itself never waits for the delete.
    pub async fn get(&self, kind: EntityKind, scope: &ScopeKey) -> Option<Value> {
        let db = self.db.clone()?;
        let partition = kind.partition();
        let key = scope.to_string();
        let now = now_ms();

        let outcome =
            tokio::task::spawn_blocking(move || read_entry(&db, partition, &key, now)).await;
        match outcome {
            Ok(Ok(ReadOutcome::Hit(value))) => Some(value),
            Ok(Ok(ReadOutcome::Expired)) => {
                debug!(%kind, %scope, "expired cache entry treated as miss");
                self.spawn_delete(kind, scope.clone());
                None
            }
            Ok(Ok(ReadOutcome::Miss)) => None,
            Ok(Err(err)) => {
                warn!(%err, %kind, "cache read failed");
                None
            }
            Err(err) => {
                warn!(%err, "cache read task failed");
                None
            }
        }
    }

    /// [`get`](Self::get), deserialized into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, kind: EntityKind, scope: &ScopeKey) -> Option<T> {
        let value = self.get(kind, scope).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(err) => {
                warn!(%err, %kind, "cached payload no longer matches the expected shape");
                None
            }
        }
    }

    /// Store a scoped entry, overwriting any previous one.
    ///
    /// `ttl` falls back to the kind's configured tier. Concurrent writers
    /// are last-write-wins; no merging is performed.
    pub async fn set<T: Serialize>(
        &self,
        kind: EntityKind,
        scope: &ScopeKey,
        data: &T,
        ttl: Option<Duration>,
    ) {
        let Some(db) = self.db.clone() else { return };
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, %kind, "unserializable cache payload dropped");
                return;
            }
        };

        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(kind));
        let created_at_ms = now_ms();
        let entry = StoredEntry {
            data: value,
            created_at_ms,
            expires_at_ms: created_at_ms.saturating_add(ttl.as_millis() as u64),
        };
        let partition = kind.partition();
        let key = scope.to_string();

        let outcome =
            tokio::task::spawn_blocking(move || write_entry(&db, partition, &key, &entry)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, %kind, "cache write failed"),
            Err(err) => warn!(%err, "cache write task failed"),
        }
    }

    /// Remove one scoped entry.
    pub async fn invalidate(&self, kind: EntityKind, scope: &ScopeKey) {
        let Some(db) = self.db.clone() else { return };
        let partition = kind.partition();
        let key = scope.to_string();

        let outcome =
            tokio::task::spawn_blocking(move || delete_entry(&db, partition, &key)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, %kind, "cache invalidation failed"),
            Err(err) => warn!(%err, "cache invalidation task failed"),
        }
    }

    /// Drop every entry across all partitions.
    pub async fn clear(&self) {
        let Some(db) = self.db.clone() else { return };
        let outcome = tokio::task::spawn_blocking(move || clear_all(&db)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "cache clear failed"),
            Err(err) => warn!(%err, "cache clear task failed"),
        }
    }

    /// Number of physically present entries in a partition (expired
    /// entries linger until read or swept).
    pub async fn count(&self, kind: EntityKind) -> usize {
        let Some(db) = self.db.clone() else { return 0 };
        let partition = kind.partition();
        let outcome = tokio::task::spawn_blocking(move || count_partition(&db, partition)).await;
        match outcome {
            Ok(Ok(count)) => count,
            Ok(Err(err)) => {
                warn!(%err, %kind, "cache count failed");
                0
            }
            Err(err) => {
                warn!(%err, "cache count task failed");
                0
            }
        }
    }

    /// Proactively delete all expired entries. Returns how many were
    /// removed.
    pub async fn sweep_expired(&self) -> usize {
        let Some(db) = self.db.clone() else { return 0 };
        let now = now_ms();
        let outcome = tokio::task::spawn_blocking(move || sweep(&db, now)).await;
        match outcome {
            Ok(Ok(removed)) => {
                if removed > 0 {
                    debug!(removed, "cache sweep removed expired entries");
                }
                removed
            }
            Ok(Err(err)) => {
                warn!(%err, "cache sweep failed");
                0
            }
            Err(err) => {
                warn!(%err, "cache sweep task failed");
                0
            }
        }
    }

    fn spawn_delete(&self, kind: EntityKind, scope: ScopeKey) {
        let cache = self.clone();
        tokio::spawn(async move {
            cache.invalidate(kind, &scope).await;
        });
    }

    fn open_db(path: &Path) -> Result<Database, StoreError> {
        let db = Database::create(path).map_err(backend_err)?;
        open_tables(&db)?;
        Ok(db)
    }
}

/// Interval-driven sweep keeping storage bounded even when nothing reads.
pub fn spawn_sweeper(cache: OfflineCache, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would sweep an empty store.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.sweep_expired().await;
            if removed > 0 {
                info!(removed, "expired cache entries swept");
            }
        }
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn open_tables(db: &Database) -> Result<(), StoreError> {
    let txn = db.begin_write().map_err(backend_err)?;
    {
        txn.open_table(DATA).map_err(backend_err)?;
        txn.open_table(EXPIRY).map_err(backend_err)?;
    }
    txn.commit().map_err(backend_err)?;
    Ok(())
}

fn read_entry(
    db: &Database,
    partition: &str,
    key: &str,
    now: u64,
) -> Result<ReadOutcome, StoreError> {
    let txn = db.begin_read().map_err(backend_err)?;
    let table = txn.open_table(DATA).map_err(backend_err)?;
    match table.get((partition, key)).map_err(backend_err)? {
        Some(guard) => {
            let entry: StoredEntry = serde_json::from_slice(guard.value())?;
            if entry.expires_at_ms <= now {
                Ok(ReadOutcome::Expired)
            } else {
                Ok(ReadOutcome::Hit(entry.data))
            }
        }
        None => Ok(ReadOutcome::Miss),
    }
}

fn write_entry(
    db: &Database,
    partition: &str,
    key: &str,
    entry: &StoredEntry,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(entry)?;
    let txn = db.begin_write().map_err(backend_err)?;
    {
        let mut data = txn.open_table(DATA).map_err(backend_err)?;
        let mut expiry = txn.open_table(EXPIRY).map_err(backend_err)?;

        // Drop the previous expiry index row before overwriting.
        if let Some(old) = data.insert((partition, key), bytes.as_slice()).map_err(backend_err)?
            && let Ok(previous) = serde_json::from_slice::<StoredEntry>(old.value())
        {
            expiry
                .remove((previous.expires_at_ms, partition, key))
                .map_err(backend_err)?;
        }
        expiry
            .insert((entry.expires_at_ms, partition, key), ())
            .map_err(backend_err)?;
    }
    txn.commit().map_err(backend_err)?;
    Ok(())
}

fn delete_entry(db: &Database, partition: &str, key: &str) -> Result<(), StoreError> {
    let txn = db.begin_write().map_err(backend_err)?;
    {
        let mut data = txn.open_table(DATA).map_err(backend_err)?;
        let mut expiry = txn.open_table(EXPIRY).map_err(backend_err)?;
        if let Some(old) = data.remove((partition, key)).map_err(backend_err)?
            && let Ok(previous) = serde_json::from_slice::<StoredEntry>(old.value())
        {
            expiry
                .remove((previous.expires_at_ms, partition, key))
                .map_err(backend_err)?;
        }
    }
    txn.commit().map_err(backend_err)?;
    Ok(())
}

fn clear_all(db: &Database) -> Result<(), StoreError> {
    let txn = db.begin_write().map_err(backend_err)?;
    {
        let mut data = txn.open_table(DATA).map_err(backend_err)?;
        data.retain(|_, _| false).map_err(backend_err)?;
        let mut expiry = txn.open_table(EXPIRY).map_err(backend_err)?;
        expiry.retain(|_, _| false).map_err(backend_err)?;
    }
    txn.commit().map_err(backend_err)?;
    Ok(())
}

fn count_partition(db: &Database, partition: &str) -> Result<usize, StoreError> {
    let txn = db.begin_read().map_err(backend_err)?;
    let table = txn.open_table(DATA).map_err(backend_err)?;
    let mut count = 0usize;
    for item in table.range((partition, "")..).map_err(backend_err)? {
        let (guard, _) = item.map_err(backend_err)?;
        if guard.value().0 != partition {
            break;
        }
        count += 1;
    }
    Ok(count)
}

fn sweep(db: &Database, now: u64) -> Result<usize, StoreError> {
    let txn = db.begin_write().map_err(backend_err)?;
    let removed;
    {
        let mut data = txn.open_table(DATA).map_err(backend_err)?;
        let mut expiry = txn.open_table(EXPIRY).map_err(backend_err)?;

        let mut doomed = Vec::new();
        for item in expiry.range(..(now, "", "")).map_err(backend_err)? {
            let (guard, _) = item.map_err(backend_err)?;
            let (expires_at, partition, key) = guard.value();
            doomed.push((expires_at, partition.to_string(), key.to_string()));
        }
        for (expires_at, partition, key) in &doomed {
            expiry
                .remove((*expires_at, partition.as_str(), key.as_str()))
                .map_err(backend_err)?;
            data.remove((partition.as_str(), key.as_str()))
                .map_err(backend_err)?;
        }
        removed = doomed.len();
    }
    txn.commit().map_err(backend_err)?;
    Ok(removed)
}
