use crate::config::Config;
use crate::counter::{CounterService, FlushLock, Reconciler, StatsReader};
use crate::kv::KvStore;
use crate::metrics::Metrics;
use crate::store::DurableStore;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CounterService>,
    pub reconciler: Arc<Reconciler>,
    pub reader: Arc<StatsReader>,
    pub metrics: Arc<Metrics>,
    pub cron_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: Arc<dyn DurableStore>,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        let service = CounterService::new(
            Arc::clone(&kv),
            config.dedup.clone(),
            Arc::clone(&metrics.actions),
        );
        let lock = FlushLock::new(
            Arc::clone(&kv),
            Duration::from_secs(config.flush.lock_ttl_secs),
        );
        let reconciler = Reconciler::new(
            kv,
            Arc::clone(&store),
            lock,
            config.flush.allow_fallback,
            Arc::clone(&metrics.flush),
        );
        let reader = StatsReader::new(store, &config.stats);

        Self {
            service: Arc::new(service),
            reconciler: Arc::new(reconciler),
            reader: Arc::new(reader),
            metrics,
            cron_secret: config
                .server
                .cron_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(Arc::from),
        }
    }
}
