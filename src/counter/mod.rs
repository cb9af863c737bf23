//! The counting pipeline: dedup gate, cache accumulator, and reconciler.

pub mod accumulator;
pub mod dedup;
pub mod fallback;
pub mod lock;
pub mod reader;
pub mod reconciler;

pub use accumulator::CounterAccumulator;
pub use dedup::{Admission, DedupGate};
pub use fallback::FallbackApplier;
pub use lock::{FlushLock, LockGuard};
pub use reader::{PostStats, StatsReader};
pub use reconciler::Reconciler;

use crate::config::DedupConfig;
use crate::error::{CounterError, CounterResult};
use crate::kv::KvStore;
use crate::metrics::ActionMetrics;
use crate::types::{ActionKind, ActorFingerprint, SubjectId};
use std::sync::Arc;
use tracing::error;

/// Result of recording one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Accepted and added to the pending counter
    Counted,
    /// Inside the dedup window; nothing changed
    AlreadyCounted,
}

/// Hot path for a single action: dedup, then one atomic increment.
///
/// Never touches durable storage.
pub struct CounterService {
    gate: DedupGate,
    accumulator: CounterAccumulator,
    metrics: Arc<ActionMetrics>,
}

impl CounterService {
    pub fn new(kv: Arc<dyn KvStore>, dedup: DedupConfig, metrics: Arc<ActionMetrics>) -> Self {
        Self {
            gate: DedupGate::new(Arc::clone(&kv), dedup),
            accumulator: CounterAccumulator::new(kv),
            metrics,
        }
    }

    pub fn accumulator(&self) -> &CounterAccumulator {
        &self.accumulator
    }

    /// Count `kind` on `subject` once per actor per dedup window.
    ///
    /// If the increment fails after the gate accepted, the marker stays set
    /// and the action is lost rather than risking a double count.
    pub async fn record(
        &self,
        kind: ActionKind,
        subject: SubjectId,
        actor: Option<&ActorFingerprint>,
    ) -> CounterResult<Outcome> {
        let admission = self.gate.admit(kind, subject, actor).await.map_err(|e| {
            if !matches!(e, CounterError::InvalidArgument(_)) {
                self.metrics.record_failure(kind);
                error!(kind = %kind, subject = %subject, error = %e, "Dedup check failed");
            }
            e
        })?;

        if admission == Admission::Duplicate {
            self.metrics.record_duplicate(kind);
            return Ok(Outcome::AlreadyCounted);
        }

        if let Err(e) = self.accumulator.increment(kind, subject, 1).await {
            self.metrics.record_failure(kind);
            error!(kind = %kind, subject = %subject, error = %e, "Failed to increment counter");
            return Err(e);
        }

        self.metrics.record_accepted(kind);
        Ok(Outcome::Counted)
    }
}
