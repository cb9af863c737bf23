use crate::error::{CounterError, CounterResult};
use crate::kv::KvStore;
use crate::types::keys::counter_key;
use crate::types::{ActionKind, SubjectId};
use std::sync::Arc;
use tracing::trace;

/// Running per-post, per-kind deltas held in the cache until the next flush.
///
/// Counters carry no TTL and are only ever incremented here; the reconciler
/// is the sole writer that lowers them.
pub struct CounterAccumulator {
    kv: Arc<dyn KvStore>,
}

impl CounterAccumulator {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Add `amount` to the pending counter and return its new value.
    pub async fn increment(
        &self,
        kind: ActionKind,
        subject: SubjectId,
        amount: u64,
    ) -> CounterResult<u64> {
        let key = counter_key(kind, subject);
        let value = self.kv.incr_by(&key, amount).await?;
        trace!(kind = %kind, subject = %subject, pending = value, "Counter incremented");

        u64::try_from(value).map_err(|_| {
            CounterError::ParseError(format!("Counter {} went negative: {}", key, value))
        })
    }

    /// Delta accumulated since the last flush; zero when none.
    pub async fn pending(&self, kind: ActionKind, subject: SubjectId) -> CounterResult<u64> {
        let key = counter_key(kind, subject);
        match self.kv.get(&key).await? {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                CounterError::ParseError(format!("Counter {} holds {:?}", key, raw))
            }),
            None => Ok(0),
        }
    }
}
