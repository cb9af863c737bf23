//! Key-value cache holding dedup markers, pending counters, and flush locks.
//!
//! The cache is assumed strongly consistent per key and not transactional
//! across keys. Every operation is a single round trip.

pub mod memory;
pub mod upstash;

pub use memory::MemoryKv;
pub use upstash::UpstashKv;

use crate::error::CounterResult;
use async_trait::async_trait;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> CounterResult<Option<String>>;

    /// Store `value`, replacing any previous value. `ttl: None` never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<()>;

    /// Store `value` only if `key` is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<bool>;

    /// Atomically add `amount`, creating the key at zero first. Keeps any TTL.
    async fn incr_by(&self, key: &str, amount: u64) -> CounterResult<i64>;

    /// Subtract `amount` only if `key` exists, deleting it once the result
    /// drops to zero or below. Returns the remainder, or `None` when the key
    /// was already gone and nothing changed.
    async fn decr_existing(&self, key: &str, amount: u64) -> CounterResult<Option<i64>>;

    /// Returns whether a key was removed.
    async fn del(&self, key: &str) -> CounterResult<bool>;

    /// Remove `key` only while it still holds `expected`.
    async fn del_if_eq(&self, key: &str, expected: &str) -> CounterResult<bool>;

    /// Every live key starting with `prefix`.
    async fn keys(&self, prefix: &str) -> CounterResult<Vec<String>>;

    async fn incr(&self, key: &str) -> CounterResult<i64> {
        self.incr_by(key, 1).await
    }
}
