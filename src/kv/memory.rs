use super::KvStore;
use crate::error::{CounterError, CounterResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache with Redis-like semantics.
///
/// Expiry is evaluated lazily against the tokio clock, so tests can drive
/// TTLs with a paused runtime. Every operation on one key runs under that
/// key's shard lock, which gives the per-key atomicity the pipeline needs.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, Slot>,
    offline: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop expired entries eagerly.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_online(&self) -> CounterResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CounterError::NetworkError(
                "In-memory cache is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn add(&self, key: &str, delta: i64) -> CounterResult<i64> {
        self.check_online()?;
        let now = Instant::now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let current = if slot.is_live(now) {
                    slot.value.parse::<i64>().map_err(|_| {
                        CounterError::ParseError(format!("Value at {} is not an integer", key))
                    })?
                } else {
                    slot.expires_at = None;
                    0
                };
                let next = current.checked_add(delta).ok_or_else(|| {
                    CounterError::InvalidArgument(format!("Counter {} would overflow", key))
                })?;
                slot.value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: delta.to_string(),
                    expires_at: None,
                });
                Ok(delta)
            }
        }
    }
}

fn to_delta(amount: u64) -> CounterResult<i64> {
    i64::try_from(amount)
        .map_err(|_| CounterError::InvalidArgument(format!("Amount {} is out of range", amount)))
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> CounterResult<Option<String>> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<()> {
        self.check_online()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at,
            },
        );
        trace!(kv_op = "set", key);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let slot = Slot {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn incr_by(&self, key: &str, amount: u64) -> CounterResult<i64> {
        self.add(key, to_delta(amount)?)
    }

    async fn decr_existing(&self, key: &str, amount: u64) -> CounterResult<Option<i64>> {
        self.check_online()?;
        let delta = to_delta(amount)?;
        let now = Instant::now();

        let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) else {
            return Ok(None);
        };
        if !occupied.get().is_live(now) {
            occupied.remove();
            return Ok(None);
        }
        let current = occupied.get().value.parse::<i64>().map_err(|_| {
            CounterError::ParseError(format!("Value at {} is not an integer", key))
        })?;
        let next = current.saturating_sub(delta);
        if next <= 0 {
            occupied.remove();
        } else {
            occupied.get_mut().value = next.to_string();
        }
        trace!(kv_op = "decr_existing", key, remainder = next);
        Ok(Some(next))
    }

    async fn del(&self, key: &str) -> CounterResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, slot)| slot.is_live(now)))
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> CounterResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, slot| slot.is_live(now) && slot.value == expected)
            .is_some())
    }

    async fn keys(&self, prefix: &str) -> CounterResult<Vec<String>> {
        self.check_online()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let kv = MemoryKv::new();
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(kv.get("b").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let kv = MemoryKv::new();
        kv.set("marker", "1", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(kv.get("marker").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(kv.get("marker").await.unwrap().is_none());
        assert!(kv.keys("mark").await.unwrap().is_empty());
        assert_eq!(kv.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_incr_creates_and_accumulates() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("c").await.unwrap(), 1);
        assert_eq!(kv.incr_by("c", 4).await.unwrap(), 5);
        assert_eq!(kv.get("c").await.unwrap(), Some("5".to_string()));
    }

    #[tokio::test]
    async fn test_decr_existing_never_creates_or_goes_negative() {
        let kv = MemoryKv::new();
        assert_eq!(kv.decr_existing("c", 2).await.unwrap(), None);
        assert!(kv.get("c").await.unwrap().is_none());

        kv.incr_by("c", 5).await.unwrap();
        assert_eq!(kv.decr_existing("c", 2).await.unwrap(), Some(3));
        assert_eq!(kv.get("c").await.unwrap(), Some("3".to_string()));

        // Reaching zero removes the key, so a repeat is a no-op
        assert_eq!(kv.decr_existing("c", 3).await.unwrap(), Some(0));
        assert!(kv.get("c").await.unwrap().is_none());
        assert_eq!(kv.decr_existing("c", 3).await.unwrap(), None);
        assert!(kv.get("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let kv = MemoryKv::new();
        kv.set("c", "abc", None).await.unwrap();
        assert!(matches!(
            kv.incr("c").await,
            Err(CounterError::ParseError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_live_entries() {
        let kv = MemoryKv::new();
        let ttl = Some(Duration::from_secs(5));
        assert!(kv.set_nx("lock", "a", ttl).await.unwrap());
        assert!(!kv.set_nx("lock", "b", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(kv.set_nx("lock", "b", ttl).await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_del_if_eq() {
        let kv = MemoryKv::new();
        kv.set("k", "3", None).await.unwrap();
        assert!(!kv.del_if_eq("k", "2").await.unwrap());
        assert!(kv.del_if_eq("k", "3").await.unwrap());
        assert!(kv.get("k").await.unwrap().is_none());
        assert!(!kv.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let kv = MemoryKv::new();
        kv.incr("views:counter:1").await.unwrap();
        kv.incr("views:counter:2").await.unwrap();
        kv.incr("likes:counter:1").await.unwrap();
        kv.set("views:seen:1:f1", "1", None).await.unwrap();

        let keys = kv.keys("views:counter:").await.unwrap();
        assert_eq!(keys, vec!["views:counter:1", "views:counter:2"]);
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let kv = MemoryKv::new();
        kv.set_offline(true);
        assert!(kv.get("a").await.unwrap_err().is_unavailable());
        assert!(kv.incr("a").await.unwrap_err().is_unavailable());

        kv.set_offline(false);
        assert_eq!(kv.incr("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        use std::sync::Arc;

        let kv = Arc::new(MemoryKv::new());
        let mut handles = vec![];
        for _ in 0..10 {
            let kv = Arc::clone(&kv);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    kv.incr("hot").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(kv.get("hot").await.unwrap(), Some("1000".to_string()));
    }
}
