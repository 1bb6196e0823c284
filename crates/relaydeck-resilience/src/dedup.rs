//! Collapsing concurrent identical requests into one in-flight call.
//!
//! Guards against duplicate bursts from re-rendering UI surfaces, not
//! against legitimate repeated user actions: an entry lingers for a short
//! grace period after its call settles, so stragglers from the same burst
//! still share the result. All callers for one key observe the same
//! eventual value or the same eventual error.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::Shared;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use relaydeck_core::error::{ApiError, ApiResult};

/// A cloneable handle onto an in-flight (or recently settled) call.
pub type SharedCall<T> = Shared<Pin<Box<dyn Future<Output = ApiResult<T>> + Send>>>;

/// Deduplicator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Maximum number of tracked entries; oldest are evicted first.
    pub capacity: usize,
    /// How long a settled entry lingers for late duplicate arrivals.
    pub settle_grace: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            settle_grace: Duration::from_millis(100),
        }
    }
}

/// Deduplicator statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupStats {
    /// Entries currently tracked.
    pub entries: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Configured settle grace period.
    pub settle_grace: Duration,
}

struct InFlight<T: Clone> {
    call: SharedCall<T>,
    started_at: Instant,
    generation: u64,
}

struct DedupInner<T: Clone> {
    entries: HashMap<String, InFlight<T>>,
    next_generation: u64,
}

/// In-flight request deduplicator.
///
/// The map is the single owner of its entries; results are shared out as
/// cloneable futures and never persisted.
pub struct RequestDeduplicator<T: Clone> {
    inner: Arc<Mutex<DedupInner<T>>>,
    config: DedupConfig,
}

impl<T: Clone> Clone for RequestDeduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

impl<T: Clone> fmt::Debug for RequestDeduplicator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("entries", &self.inner.lock().entries.len())
            .field("capacity", &self.config.capacity)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> RequestDeduplicator<T> {
    /// Create a new deduplicator.
    pub fn new(config: DedupConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DedupInner {
                entries: HashMap::new(),
                next_generation: 0,
            })),
            config,
        }
    }

    /// Create a deduplicator with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(DedupConfig::default())
    }

    /// Run `produce` for `key`, or join an identical in-flight call.
    ///
    /// Must be called from within a tokio runtime: the underlying call is
    /// driven by a spawned task so it settles even if every caller stops
    /// polling, and entry removal is scheduled off the settlement.
    pub async fn dedupe<F, Fut>(&self, key: &str, produce: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        self.join_or_insert(key, produce).0.await
    }

    /// Lower-level [`dedupe`](Self::dedupe) that also reports whether an
    /// existing call was joined.
    pub fn join_or_insert<F, Fut>(&self, key: &str, produce: F) -> (SharedCall<T>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            trace!(key, "joining in-flight call");
            return (entry.call.clone(), true);
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        // Drive the call on its own task: it settles regardless of caller
        // polling, and the settle-grace removal always fires.
        let map = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let grace = self.config.settle_grace;
        let task = tokio::spawn(async move {
            let result = produce().await;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let mut inner = map.lock();
                if inner
                    .entries
                    .get(&owned_key)
                    .is_some_and(|entry| entry.generation == generation)
                {
                    inner.entries.remove(&owned_key);
                }
            });
            result
        });
        let call: SharedCall<T> = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(ApiError::Transport(format!("in-flight call aborted: {err}"))),
            }
        }
        .boxed()
        .shared();

        inner.entries.insert(
            key.to_string(),
            InFlight {
                call: call.clone(),
                started_at: Instant::now(),
                generation,
            },
        );
        Self::evict_over_capacity(&mut inner, self.config.capacity);
        (call, false)
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop all tracked entries. In-flight calls keep running; future
    /// callers simply stop joining them.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Deduplicator statistics.
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            entries: self.len(),
            capacity: self.config.capacity,
            settle_grace: self.config.settle_grace,
        }
    }

    fn evict_over_capacity(inner: &mut DedupInner<T>, capacity: usize) {
        while inner.entries.len() > capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.started_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    trace!(key = %key, "evicting oldest deduplication entry");
                    inner.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_call(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = ApiResult<u32>> + Send + 'static + use<> {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let dedup = RequestDeduplicator::with_defaults();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            dedup.dedupe("GET /agents", {
                let calls = Arc::clone(&calls);
                move || counted_call(&calls, 7)
            }),
            dedup.dedupe("GET /agents", {
                let calls = Arc::clone(&calls);
                move || counted_call(&calls, 8)
            }),
            dedup.dedupe("GET /agents", {
                let calls = Arc::clone(&calls);
                move || counted_call(&calls, 9)
            }),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[tokio::test]
    async fn caller_within_grace_window_still_joins() {
        let dedup = RequestDeduplicator::new(DedupConfig {
            capacity: 10,
            settle_grace: Duration::from_millis(100),
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let first = dedup
            .dedupe("k", {
                let calls = Arc::clone(&calls);
                move || counted_call(&calls, 1)
            })
            .await
            .unwrap();
        // Arrives just after settlement, inside the grace window.
        let second = dedup
            .dedupe("k", {
                let calls = Arc::clone(&calls);
                move || counted_call(&calls, 2)
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn entry_removed_after_grace_elapses() {
        let dedup = RequestDeduplicator::new(DedupConfig {
            capacity: 10,
            settle_grace: Duration::from_millis(30),
        });
        let calls = Arc::new(AtomicUsize::new(0));

        dedup
            .dedupe("k", {
                let calls = Arc::clone(&calls);
                move || counted_call(&calls, 1)
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!dedup.contains("k"));

        dedup
            .dedupe("k", {
                let calls = Arc::clone(&calls);
                move || counted_call(&calls, 2)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_shared_too() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::with_defaults();
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<u32, _>(ApiError::Http {
                    status: 503,
                    message: "unavailable".into(),
                })
            }
        };

        let (a, b) = tokio::join!(
            dedup.dedupe("k", {
                let calls = Arc::clone(&calls);
                move || failing(&calls)
            }),
            dedup.dedupe("k", {
                let calls = Arc::clone(&calls);
                move || failing(&calls)
            }),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap_err().status(), Some(503));
        assert_eq!(b.unwrap_err().status(), Some(503));
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new(DedupConfig {
            capacity: 2,
            settle_grace: Duration::from_secs(5),
        });

        for (idx, key) in ["a", "b", "c"].iter().enumerate() {
            let value = idx as u32;
            dedup
                .dedupe(key, move || async move { Ok(value) })
                .await
                .unwrap();
            // Distinct insertion instants so eviction order is stable.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(dedup.len(), 2);
        assert!(!dedup.contains("a"));
        assert!(dedup.contains("b"));
        assert!(dedup.contains("c"));
    }

    #[tokio::test]
    async fn clear_empties_the_map() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::with_defaults();
        dedup.dedupe("k", || async { Ok(1) }).await.unwrap();
        assert!(!dedup.is_empty());

        dedup.clear();
        assert!(dedup.is_empty());
        assert_eq!(dedup.stats().entries, 0);
    }
}
