use moka::future::Cache as MokaCache;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Snapshot of read-cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub size: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.hits as f64 / total as f64) * 100.0
    }
}

/// Bounded TTL cache in front of durable reads.
///
/// Entries expire `ttl` after insertion, so a cached read is never staler
/// than the TTL plus the unflushed window. Concurrent misses on one key
/// share a single load.
pub struct ReadCache<K, V> {
    inner: MokaCache<K, Arc<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: Arc<AtomicU64>,
}

impl<K, V> ReadCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        let value = self.inner.get(key).await;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, Arc::new(value)).await;
    }

    /// Return the cached value, or run `load` and cache its result.
    ///
    /// Errors are not cached. `E` is cloned out of moka's shared error so
    /// every waiter on the same load sees it.
    pub async fn get_or_try_load<F, E>(&self, key: K, load: F) -> Result<Arc<V>, E>
    where
        F: Future<Output = Result<V, E>>,
        E: Clone + Send + Sync + 'static,
    {
        if let Some(value) = self.get(&key).await {
            trace!("read cache hit");
            return Ok(value);
        }

        let loads = Arc::clone(&self.loads);
        self.inner
            .try_get_with(key, async move {
                loads.fetch_add(1, Ordering::Relaxed);
                load.await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<E>| (*e).clone())
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            size: self.inner.entry_count(),
        }
    }
}
