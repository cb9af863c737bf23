//! Low-contention counter for per-request statistics.
//!
//! Every action request bumps a metric; spreading those bumps over several
//! cache lines keeps the hot path from serializing on one atomic.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

const SHARDS: usize = 16;

thread_local! {
    static NEXT_SHARD: Cell<usize> = const { Cell::new(0) };
}

/// Shard selection is round-robin per thread. Tasks migrating between
/// threads is harmless since only the total is ever read.
#[derive(Debug)]
pub struct ShardedCounter {
    shards: Vec<AtomicU64>,
}

impl ShardedCounter {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, amount: u64) {
        let idx = NEXT_SHARD.with(|next| {
            let idx = next.get();
            next.set(idx.wrapping_add(1));
            idx % SHARDS
        });
        self.shards[idx].fetch_add(amount, Ordering::Relaxed);
    }

    pub fn sum(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_sum() {
        let counter = ShardedCounter::new();
        counter.increment();
        counter.add(4);
        assert_eq!(counter.sum(), 5);
    }

    #[test]
    fn test_concurrent_threads() {
        let counter = Arc::new(ShardedCounter::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        counter.increment();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.sum(), 4_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks() {
        let counter = Arc::new(ShardedCounter::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    counter.increment();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(counter.sum(), 1_600);
    }
}
