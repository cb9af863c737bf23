use crate::sharded_counter::ShardedCounter;
use crate::types::{ActionKind, FlushSummary};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

fn slot(kind: ActionKind) -> usize {
    match kind {
        ActionKind::View => 0,
        ActionKind::Like => 1,
        ActionKind::Share => 2,
    }
}

/// Hot-path counters for incoming actions.
#[derive(Debug, Default)]
pub struct ActionMetrics {
    accepted: [ShardedCounter; 3],
    duplicates: [ShardedCounter; 3],
    /// Actions rejected because the cache could not be reached or written
    pub failures: AtomicU64,
    /// Requests rejected before reaching the pipeline
    pub rejected: AtomicU64,
}

impl ActionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self, kind: ActionKind) {
        self.accepted[slot(kind)].increment();
        trace!(action = %kind, outcome = "accepted");
    }

    pub fn record_duplicate(&self, kind: ActionKind) {
        self.duplicates[slot(kind)].increment();
        trace!(action = %kind, outcome = "duplicate");
    }

    pub fn record_failure(&self, kind: ActionKind) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        trace!(action = %kind, outcome = "failed");
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self, kind: ActionKind) -> u64 {
        self.accepted[slot(kind)].sum()
    }

    pub fn duplicates(&self, kind: ActionKind) -> u64 {
        self.duplicates[slot(kind)].sum()
    }

    /// Share of actions that were already counted, as a percentage
    pub fn duplicate_rate(&self) -> f64 {
        let accepted: u64 = ActionKind::all().map(|k| self.accepted(k)).sum();
        let duplicates: u64 = ActionKind::all().map(|k| self.duplicates(k)).sum();
        let total = accepted + duplicates;
        if total == 0 {
            return 0.0;
        }
        (duplicates as f64 / total as f64) * 100.0
    }

    pub fn log_summary(&self, elapsed_secs: f64) {
        info!(
            operation = "action_metrics_summary",
            views = self.accepted(ActionKind::View),
            likes = self.accepted(ActionKind::Like),
            shares = self.accepted(ActionKind::Share),
            duplicate_rate_pct = self.duplicate_rate(),
            failures = self.failures.load(Ordering::Relaxed),
            rejected = self.rejected.load(Ordering::Relaxed),
            duration_secs = elapsed_secs,
        );
    }
}

/// Counters for reconciliation runs.
#[derive(Debug, Default)]
pub struct FlushMetrics {
    pub runs: AtomicU64,
    pub keys_flushed: AtomicU64,
    pub keys_retained: AtomicU64,
    pub keys_orphaned: AtomicU64,
    pub keys_malformed: AtomicU64,
    pub keys_degraded: AtomicU64,
    /// Kinds skipped because another run held the lock
    pub contended: AtomicU64,
    /// Kinds whose scan failed
    pub failed: AtomicU64,
    pub total_duration_ns: AtomicU64,
}

impl FlushMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, summary: &FlushSummary, duration: Duration) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);

        for kind in summary.kinds.values() {
            self.keys_flushed
                .fetch_add(kind.flushed as u64, Ordering::Relaxed);
            self.keys_retained
                .fetch_add(kind.retained as u64, Ordering::Relaxed);
            self.keys_orphaned
                .fetch_add(kind.orphaned as u64, Ordering::Relaxed);
            self.keys_malformed
                .fetch_add(kind.malformed as u64, Ordering::Relaxed);
            self.keys_degraded
                .fetch_add(kind.degraded as u64, Ordering::Relaxed);
            if kind.contended {
                self.contended.fetch_add(1, Ordering::Relaxed);
            }
            if kind.failed {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(
            flush_op = "run",
            flushed = summary.total_flushed(),
            retained = summary.total_retained(),
            duration_ms = duration.as_millis() as u64
        );
    }

    pub fn avg_duration_ms(&self) -> f64 {
        let runs = self.runs.load(Ordering::Relaxed);
        if runs == 0 {
            return 0.0;
        }
        let total_ns = self.total_duration_ns.load(Ordering::Relaxed);
        (total_ns as f64 / runs as f64) / 1_000_000.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "flush_metrics_summary",
            runs = self.runs.load(Ordering::Relaxed),
            flushed = self.keys_flushed.load(Ordering::Relaxed),
            retained = self.keys_retained.load(Ordering::Relaxed),
            orphaned = self.keys_orphaned.load(Ordering::Relaxed),
            malformed = self.keys_malformed.load(Ordering::Relaxed),
            degraded = self.keys_degraded.load(Ordering::Relaxed),
            contended = self.contended.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            avg_duration_ms = self.avg_duration_ms(),
        );
    }
}

/// Request metrics for one remote backend.
#[derive(Debug, Default)]
pub struct BackendMetrics {
    pub request_count: AtomicU64,
    pub success_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub retry_count: AtomicU64,
    /// Total time spent in successful calls (nanoseconds)
    pub total_latency_ns: AtomicU64,
    pub circuit_breaker_opens: AtomicU64,
    pub circuit_breaker_closes: AtomicU64,
}

impl BackendMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, endpoint: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        trace!(backend_op = "request", endpoint = endpoint);
    }

    pub fn record_success(&self, endpoint: &str, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            backend_op = "success",
            endpoint = endpoint,
            latency_ms = latency.as_millis() as u64
        );
    }

    pub fn record_failure(&self, endpoint: &str, error: &str) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        trace!(backend_op = "failure", endpoint = endpoint, error = error);
    }

    pub fn record_retry(&self, endpoint: &str, attempt: u32) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
        debug!(backend_op = "retry", endpoint = endpoint, attempt = attempt);
    }

    pub fn record_circuit_breaker_open(&self) {
        self.circuit_breaker_opens.fetch_add(1, Ordering::Relaxed);
        warn!(backend_op = "circuit_breaker", state = "opened");
    }

    pub fn record_circuit_breaker_close(&self) {
        self.circuit_breaker_closes.fetch_add(1, Ordering::Relaxed);
        info!(backend_op = "circuit_breaker", state = "closed");
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.success_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let success = self.success_count.load(Ordering::Relaxed);
        (success as f64 / total as f64) * 100.0
    }

    pub fn log_summary(&self, backend: &str) {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            return;
        }
        info!(
            operation = "backend_metrics_summary",
            backend = backend,
            total_requests = total,
            successful = self.success_count.load(Ordering::Relaxed),
            failed = self.failure_count.load(Ordering::Relaxed),
            retries = self.retry_count.load(Ordering::Relaxed),
            success_rate_pct = self.success_rate(),
            avg_latency_ms = self.avg_latency_ms(),
        );
    }
}

/// All metrics of a running service.
pub struct Metrics {
    pub actions: Arc<ActionMetrics>,
    pub flush: Arc<FlushMetrics>,
    pub kv: Arc<BackendMetrics>,
    pub store: Arc<BackendMetrics>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            actions: Arc::new(ActionMetrics::new()),
            flush: Arc::new(FlushMetrics::new()),
            kv: Arc::new(BackendMetrics::new()),
            store: Arc::new(BackendMetrics::new()),
            start_time: Instant::now(),
        }
    }

    fn log_sections(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        self.actions.log_summary(elapsed);
        self.flush.log_summary();
        self.kv.log_summary("kv");
        self.store.log_summary("store");
    }

    pub fn log_full_summary(&self) {
        info!("=== blog-counters metrics summary ===");
        self.log_sections();
        info!("=====================================");
    }

    pub fn log_periodic(&self) {
        info!("--- blog-counters metrics (periodic) ---");
        self.log_sections();
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log a summary every `interval_secs` until `stop` is set.
    pub fn spawn_periodic_logging(
        self: &Arc<Self>,
        interval_secs: u64,
        stop: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                metrics.log_periodic();
            }
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
