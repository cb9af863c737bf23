pub mod api;
pub mod cache;
pub mod config;
pub mod counter;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod sharded_counter;
pub mod store;
pub mod types;

pub use config::{CliArgs, Config};
pub use counter::{CounterService, Outcome, Reconciler, StatsReader};
pub use error::{CounterError, CounterResult};
pub use metrics::Metrics;
pub use server::AppState;
pub use types::{ActionKind, ActorFingerprint, FlushSummary, SubjectId};

use anyhow::{Context, Result};
use config::{KvBackend, StoreBackend};
use kv::{KvStore, MemoryKv, UpstashKv};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::{DurableStore, MemoryStore, PostgrestStore};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

pub fn build_kv(config: &Config, metrics: &Metrics) -> CounterResult<Arc<dyn KvStore>> {
    Ok(match config.kv.backend {
        KvBackend::Memory => Arc::new(MemoryKv::new()),
        KvBackend::Upstash => Arc::new(UpstashKv::new(
            &config.kv.url,
            config.kv.token.as_deref().unwrap_or_default(),
            &config.http,
            Arc::clone(&metrics.kv),
        )?),
    })
}

pub fn build_store(config: &Config, metrics: &Metrics) -> CounterResult<Arc<dyn DurableStore>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::creating_posts()),
        StoreBackend::Postgrest => Arc::new(PostgrestStore::new(
            &config.store.url,
            config.store.key.as_deref().unwrap_or_default(),
            &config.http,
            Arc::clone(&metrics.store),
        )?),
    })
}

/// Build the shared state from configuration, connecting the configured
/// backends.
pub fn build_state(config: &Config, metrics: Arc<Metrics>) -> CounterResult<AppState> {
    if config.kv.backend == KvBackend::Memory || config.store.backend == StoreBackend::Memory {
        warn!(
            kv = ?config.kv.backend,
            store = ?config.store.backend,
            "Using in-process backends; counts do not survive a restart"
        );
    }
    let kv = build_kv(config, &metrics)?;
    let store = build_store(config, &metrics)?;
    Ok(AppState::new(kv, store, config, metrics))
}

/// Serve the HTTP API until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    info!(operation = "startup", message = "blog-counters starting");
    tracing::debug!(config = ?config, "Configuration loaded");

    let metrics = Arc::new(Metrics::new());
    let state =
        build_state(&config, Arc::clone(&metrics)).context("Failed to initialize backends")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = config.flush.embedded.then(|| {
        scheduler::spawn_flush_loop(
            Arc::clone(&state.reconciler),
            Duration::from_secs(config.flush.interval_secs),
            stop_rx,
        )
    });

    let stop_logging = Arc::new(AtomicBool::new(false));
    let metrics_task = (config.logging.metrics_interval_secs > 0).then(|| {
        metrics.spawn_periodic_logging(
            config.logging.metrics_interval_secs,
            Arc::clone(&stop_logging),
        )
    });

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    server::serve(listener, state.clone(), server::shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let _ = stop_tx.send(true);
    if let Some(handle) = scheduler {
        let _ = handle.await;
        // Drain what accumulated since the last tick
        match state.reconciler.flush().await {
            Ok(summary) => info!(flushed = summary.total_flushed(), "Final flush complete"),
            Err(e) => warn!(error = %e, "Final flush failed; counters remain pending"),
        }
    }

    stop_logging.store(true, Ordering::Relaxed);
    if let Some(handle) = metrics_task {
        handle.abort();
    }

    metrics.log_full_summary();
    Ok(())
}

/// Run a single reconciliation pass, for use from an external scheduler.
pub async fn flush_once(config: &Config) -> Result<FlushSummary> {
    let metrics = Arc::new(Metrics::new());
    let state =
        build_state(config, Arc::clone(&metrics)).context("Failed to initialize backends")?;
    let summary = state.reconciler.flush().await.context("Flush failed")?;
    metrics.log_full_summary();
    Ok(summary)
}
