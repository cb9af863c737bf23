use super::fallback::FallbackApplier;
use super::lock::FlushLock;
use crate::error::{CounterError, CounterResult};
use crate::kv::KvStore;
use crate::metrics::FlushMetrics;
use crate::store::DurableStore;
use crate::types::keys::{counter_prefix, parse_counter_key};
use crate::types::{ActionKind, FlushSummary, KindFlush, SubjectId};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Pending keys of one kind applied in parallel during a flush.
const FLUSH_CONCURRENCY: usize = 8;

/// What happened to one pending-counter key during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Flushed { degraded: bool },
    Retained,
    /// The post is missing from durable storage; the key stays pending
    Orphaned,
    Malformed,
    Skipped,
}

/// Drains pending counters from the cache into durable storage.
///
/// Each key is applied as one delta and then cleared by subtracting exactly
/// the drained amount, so increments that land mid-flush stay pending for
/// the next run. A failed apply leaves the key untouched.
pub struct Reconciler {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DurableStore>,
    lock: FlushLock,
    fallback: Option<FallbackApplier>,
    metrics: Arc<FlushMetrics>,
}

impl Reconciler {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: Arc<dyn DurableStore>,
        lock: FlushLock,
        allow_fallback: bool,
        metrics: Arc<FlushMetrics>,
    ) -> Self {
        let fallback = allow_fallback.then(|| FallbackApplier::new(Arc::clone(&store)));
        Self {
            kv,
            store,
            lock,
            fallback,
            metrics,
        }
    }

    /// Flush every kind, bucketing deltas under today's UTC date.
    pub async fn flush(&self) -> CounterResult<FlushSummary> {
        self.flush_at(Utc::now().date_naive()).await
    }

    /// Flush each kind in turn. A kind that fails is marked in the summary
    /// and the rest still run; the call fails only when every kind did.
    pub async fn flush_at(&self, day: NaiveDate) -> CounterResult<FlushSummary> {
        let started = Instant::now();
        let mut summary = FlushSummary::default();
        let mut last_error = None;

        for kind in ActionKind::all() {
            let result = match self.flush_kind(kind, day).await {
                Ok(result) => result,
                Err(e) => {
                    error!(kind = %kind, error = %e, "Flush failed for kind, continuing");
                    last_error = Some(e);
                    KindFlush {
                        failed: true,
                        ..Default::default()
                    }
                }
            };
            summary.kinds.insert(kind, result);
        }

        let elapsed = started.elapsed();
        self.metrics.record_run(&summary, elapsed);

        let failed = summary.failed_kinds().count();
        if failed == summary.kinds.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        info!(
            views = summary.flushed(ActionKind::View),
            likes = summary.flushed(ActionKind::Like),
            shares = summary.flushed(ActionKind::Share),
            retained = summary.total_retained(),
            failed_kinds = failed,
            duration_ms = elapsed.as_millis() as u64,
            "Flush complete"
        );
        Ok(summary)
    }

    /// Flush one kind under its lock.
    ///
    /// Only failing to reach the cache at all is an error; per-key failures
    /// are counted and the scan continues.
    #[instrument(skip(self, day))]
    pub async fn flush_kind(&self, kind: ActionKind, day: NaiveDate) -> CounterResult<KindFlush> {
        let Some(guard) = self.lock.acquire(kind).await? else {
            return Ok(KindFlush {
                contended: true,
                ..Default::default()
            });
        };

        let result = self.drain(kind, day).await;

        if let Err(e) = self.lock.release(guard).await {
            // The lock still expires by TTL
            warn!(kind = %kind, error = %e, "Failed to release flush lock");
        }
        result
    }

    async fn drain(&self, kind: ActionKind, day: NaiveDate) -> CounterResult<KindFlush> {
        let keys = self.kv.keys(&counter_prefix(kind)).await?;
        debug!(kind = %kind, keys = keys.len(), "Scanning pending counters");

        let outcomes: Vec<KeyOutcome> = stream::iter(keys)
            .map(|key| async move { self.flush_key(kind, &key, day).await }.boxed())
            .buffer_unordered(FLUSH_CONCURRENCY)
            .collect()
            .await;

        let mut result = KindFlush::default();
        for outcome in outcomes {
            match outcome {
                KeyOutcome::Flushed { degraded } => {
                    result.flushed += 1;
                    if degraded {
                        result.degraded += 1;
                    }
                }
                KeyOutcome::Retained => result.retained += 1,
                KeyOutcome::Orphaned => result.orphaned += 1,
                KeyOutcome::Malformed => result.malformed += 1,
                KeyOutcome::Skipped => {}
            }
        }
        Ok(result)
    }

    async fn flush_key(&self, kind: ActionKind, key: &str, day: NaiveDate) -> KeyOutcome {
        let subject = match parse_counter_key(kind, key) {
            Ok(subject) => subject,
            Err(e) => {
                warn!(key, error = %e, "Ignoring malformed counter key");
                return KeyOutcome::Malformed;
            }
        };

        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return KeyOutcome::Skipped,
            Err(e) => {
                warn!(key, error = %e, "Failed to read pending counter");
                return KeyOutcome::Retained;
            }
        };
        let amount = match raw.parse::<i64>() {
            Ok(n) if n > 0 => n as u64,
            Ok(_) => {
                // Nothing to apply; only remove it if no increment landed since
                return match self.kv.del_if_eq(key, &raw).await {
                    Ok(_) => KeyOutcome::Skipped,
                    Err(e) => {
                        warn!(key, value = %raw, error = %e, "Failed to remove non-positive counter");
                        KeyOutcome::Retained
                    }
                };
            }
            Err(_) => {
                warn!(key, value = %raw, "Pending counter is not an integer");
                return KeyOutcome::Malformed;
            }
        };

        let degraded = match self.apply(subject, kind, amount, day).await {
            Ok(degraded) => degraded,
            Err(CounterError::NotFound(_)) => {
                warn!(subject = %subject, kind = %kind, amount, "Post not found in storage, keeping counter pending");
                return KeyOutcome::Orphaned;
            }
            Err(e) => {
                warn!(subject = %subject, kind = %kind, amount, error = %e, "Failed to apply delta, retaining");
                return KeyOutcome::Retained;
            }
        };

        self.clear(key, amount).await;
        KeyOutcome::Flushed { degraded }
    }

    /// Apply through the atomic primitive, or the gated fallback when the
    /// store lacks it. Returns whether the fallback was used.
    async fn apply(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        amount: u64,
        day: NaiveDate,
    ) -> CounterResult<bool> {
        match self.store.apply_delta(subject, kind, amount, day).await {
            Ok(()) => Ok(false),
            Err(CounterError::Unsupported(reason)) => match &self.fallback {
                Some(fallback) => {
                    debug!(subject = %subject, kind = %kind, %reason, "Using non-atomic fallback");
                    fallback.apply(subject, kind, amount, day).await?;
                    Ok(true)
                }
                None => Err(CounterError::Unsupported(reason)),
            },
            Err(e) => Err(e),
        }
    }

    /// Remove `amount` from the pending counter after it was applied.
    /// Increments that arrived meanwhile stay pending; a key that is already
    /// gone is never recreated.
    async fn clear(&self, key: &str, amount: u64) {
        match self.kv.decr_existing(key, amount).await {
            Ok(Some(remainder)) if remainder > 0 => {
                debug!(key, remainder, "Counter incremented during flush, remainder kept");
            }
            Ok(Some(_)) => {}
            Ok(None) => warn!(key, amount, "Pending counter vanished before it was cleared"),
            Err(e) => error!(
                key,
                amount,
                error = %e,
                "Delta applied but clear unconfirmed; it may be applied again"
            ),
        }
    }
}
