use crate::counter::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// In-process replacement for the external cron trigger.
///
/// Runs a flush every `interval` until `stop` flips to true. A failed run is
/// logged and the next tick tries again; pending counters are never lost by
/// a failed run.
pub fn spawn_flush_loop(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        info!(interval_secs = interval.as_secs(), "Embedded flush scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match reconciler.flush().await {
                        Ok(summary) => debug!(flushed = summary.total_flushed(), "Scheduled flush done"),
                        Err(e) => warn!(error = %e, "Scheduled flush failed"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Embedded flush scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::FlushLock;
    use crate::kv::{KvStore, MemoryKv};
    use crate::metrics::FlushMetrics;
    use crate::store::MemoryStore;
    use crate::types::{ActionKind, SubjectId};

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_each_tick_until_stopped() {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(MemoryStore::with_posts([1]).unwrap());
        let metrics = Arc::new(FlushMetrics::new());
        let reconciler = Arc::new(Reconciler::new(
            kv.clone(),
            store.clone(),
            FlushLock::new(kv.clone(), Duration::from_secs(30)),
            false,
            Arc::clone(&metrics),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_flush_loop(reconciler, Duration::from_secs(60), rx);

        kv.incr_by("views:counter:1", 2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.totals(SubjectId::new(1).unwrap()).get(ActionKind::View), 2);

        kv.incr_by("views:counter:1", 1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.totals(SubjectId::new(1).unwrap()).get(ActionKind::View), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(metrics.runs.load(std::sync::atomic::Ordering::Relaxed) >= 2);
    }
}
