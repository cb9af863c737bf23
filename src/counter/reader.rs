use crate::cache::{CacheStats, ReadCache};
use crate::config::StatsConfig;
use crate::error::{CounterError, CounterResult};
use crate::store::DurableStore;
use crate::types::{DailyStats, PostTotals, SubjectId};
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Durable counts for one post as shown on the stats page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostStats {
    pub totals: PostTotals,
    pub daily: Vec<DailyStats>,
}

/// Read path over durable storage.
///
/// Results are cached briefly; pending counts not yet flushed are not
/// included.
pub struct StatsReader {
    store: Arc<dyn DurableStore>,
    cache: ReadCache<SubjectId, PostStats>,
    window_days: u32,
}

impl StatsReader {
    pub fn new(store: Arc<dyn DurableStore>, config: &StatsConfig) -> Self {
        Self {
            store,
            cache: ReadCache::new(
                config.max_entries as u64,
                Duration::from_secs(config.cache_ttl_secs),
            ),
            window_days: config.daily_window_days,
        }
    }

    pub async fn stats(&self, subject: SubjectId) -> CounterResult<Arc<PostStats>> {
        self.stats_at(subject, Utc::now().date_naive()).await
    }

    /// Stats with the daily window ending on `today`.
    pub async fn stats_at(
        &self,
        subject: SubjectId,
        today: NaiveDate,
    ) -> CounterResult<Arc<PostStats>> {
        let since = today
            .checked_sub_days(Days::new(u64::from(self.window_days)))
            .unwrap_or(NaiveDate::MIN);

        self.cache
            .get_or_try_load(subject, async move {
                debug!(subject = %subject, %since, "Loading stats from store");
                let totals = self
                    .store
                    .read_totals(subject)
                    .await?
                    .ok_or_else(|| CounterError::NotFound(format!("Post {} not found", subject)))?;
                let daily = self.store.daily_series(subject, since).await?;
                Ok(PostStats { totals, daily })
            })
            .await
    }

    /// Drop any cached stats for `subject`.
    pub async fn invalidate(&self, subject: SubjectId) {
        self.cache.invalidate(&subject).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MockDurableStore};
    use crate::types::ActionKind;

    fn subject(id: u64) -> SubjectId {
        SubjectId::new(id).unwrap()
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn config() -> StatsConfig {
        StatsConfig {
            cache_ttl_secs: 60,
            max_entries: 100,
            daily_window_days: 7,
        }
    }

    #[tokio::test]
    async fn test_totals_and_windowed_series() {
        let store = Arc::new(MemoryStore::with_posts([42]).unwrap());
        store
            .apply_delta(subject(42), ActionKind::View, 5, date(1, 1))
            .await
            .unwrap();
        store
            .apply_delta(subject(42), ActionKind::View, 2, date(1, 9))
            .await
            .unwrap();

        let reader = StatsReader::new(store, &config());
        let stats = reader.stats_at(subject(42), date(1, 10)).await.unwrap();
        assert_eq!(stats.totals.views, 7);
        assert_eq!(stats.daily.len(), 1);
        assert_eq!(stats.daily[0].date, date(1, 9));
    }

    #[tokio::test]
    async fn test_unknown_post_is_not_found() {
        let reader = StatsReader::new(Arc::new(MemoryStore::new()), &config());
        let result = reader.stats_at(subject(1), date(3, 1)).await;
        assert!(matches!(result, Err(CounterError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reads_are_cached_until_invalidated() {
        let mut store = MockDurableStore::new();
        store
            .expect_read_totals()
            .times(2)
            .returning(|s| Ok(Some(PostTotals::new(s))));
        store.expect_daily_series().times(2).returning(|_, _| Ok(vec![]));

        let reader = StatsReader::new(Arc::new(store), &config());
        reader.stats_at(subject(5), date(5, 5)).await.unwrap();
        reader.stats_at(subject(5), date(5, 5)).await.unwrap();
        assert_eq!(reader.cache_stats().loads, 1);

        reader.invalidate(subject(5)).await;
        reader.stats_at(subject(5), date(5, 5)).await.unwrap();
        assert_eq!(reader.cache_stats().loads, 2);
    }

    #[tokio::test]
    async fn test_store_errors_propagate_uncached() {
        let mut store = MockDurableStore::new();
        store
            .expect_read_totals()
            .times(1)
            .returning(|_| Err(CounterError::NetworkError("down".to_string())));

        let reader = StatsReader::new(Arc::new(store), &config());
        let result = reader.stats_at(subject(5), date(5, 5)).await;
        assert!(result.unwrap_err().is_unavailable());
        assert_eq!(reader.cache_stats().size, 0);
    }
}
