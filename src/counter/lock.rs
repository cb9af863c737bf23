use crate::error::CounterResult;
use crate::kv::KvStore;
use crate::types::keys::lock_key;
use crate::types::ActionKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Proof of holding a kind's flush lock.
#[derive(Debug)]
pub struct LockGuard {
    kind: ActionKind,
    key: String,
    token: String,
}

impl LockGuard {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }
}

/// Per-kind mutual exclusion between reconciler runs, held in the cache.
///
/// The lock expires on its own after `ttl`, so a crashed run never blocks
/// later ones for longer than that.
pub struct FlushLock {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl FlushLock {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn token() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!(
            "{}-{}-{}",
            std::process::id(),
            nanos,
            NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Take the lock for `kind`, or `None` when another run holds it.
    pub async fn acquire(&self, kind: ActionKind) -> CounterResult<Option<LockGuard>> {
        let key = lock_key(kind);
        let token = Self::token();
        if self.kv.set_nx(&key, &token, Some(self.ttl)).await? {
            debug!(kind = %kind, "Flush lock acquired");
            Ok(Some(LockGuard { kind, key, token }))
        } else {
            debug!(kind = %kind, "Flush lock held elsewhere");
            Ok(None)
        }
    }

    /// Release the lock if it is still ours. Returns false when it had
    /// already expired or been taken over.
    pub async fn release(&self, guard: LockGuard) -> CounterResult<bool> {
        let released = self.kv.del_if_eq(&guard.key, &guard.token).await?;
        if !released {
            warn!(kind = %guard.kind, "Flush lock expired before release");
        }
        Ok(released)
    }
}
