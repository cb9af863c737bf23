use super::DurableStore;
use crate::error::{CounterError, CounterResult};
use crate::types::{ActionKind, DailyStats, PostTotals, SubjectId};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::trace;

/// In-process durable store.
///
/// By default posts must be registered with [`MemoryStore::insert_post`]
/// before deltas can be applied to them, mirroring the foreign key on the
/// real tables. [`MemoryStore::creating_posts`] instead creates a zeroed post
/// on its first write. Toggles simulate a missing delta primitive, an unreachable backend, and
/// transient apply failures.
#[derive(Debug)]
pub struct MemoryStore {
    posts: DashMap<SubjectId, PostTotals>,
    daily: DashMap<(SubjectId, NaiveDate), DailyStats>,
    next_row_id: AtomicU64,
    create_missing: bool,
    atomic_enabled: AtomicBool,
    offline: AtomicBool,
    failing_applies: AtomicU32,
    apply_calls: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            posts: DashMap::new(),
            daily: DashMap::new(),
            next_row_id: AtomicU64::new(1),
            create_missing: false,
            atomic_enabled: AtomicBool::new(true),
            offline: AtomicBool::new(false),
            failing_applies: AtomicU32::new(0),
            apply_calls: AtomicU64::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that creates any post on its first write.
    pub fn creating_posts() -> Self {
        Self {
            create_missing: true,
            ..Self::default()
        }
    }

    /// Store seeded with zeroed posts.
    pub fn with_posts(ids: impl IntoIterator<Item = u64>) -> CounterResult<Self> {
        let store = Self::new();
        for id in ids {
            store.insert_post(SubjectId::new(id)?);
        }
        Ok(store)
    }

    pub fn insert_post(&self, subject: SubjectId) {
        self.posts
            .entry(subject)
            .or_insert_with(|| PostTotals::new(subject));
    }

    pub fn remove_post(&self, subject: SubjectId) {
        self.posts.remove(&subject);
        self.daily.retain(|(id, _), _| *id != subject);
    }

    /// Current totals, or zeroes for an unknown post.
    pub fn totals(&self, subject: SubjectId) -> PostTotals {
        self.posts
            .get(&subject)
            .map(|p| *p)
            .unwrap_or_else(|| PostTotals::new(subject))
    }

    pub fn daily_row(&self, subject: SubjectId, day: NaiveDate) -> Option<DailyStats> {
        self.daily.get(&(subject, day)).map(|r| r.clone())
    }

    /// Turn the atomic delta primitive on or off. When off, `apply_delta`
    /// fails with `Unsupported`.
    pub fn set_atomic_enabled(&self, enabled: bool) {
        self.atomic_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `apply_delta` fail without applying.
    pub fn fail_next_applies(&self, count: u32) {
        self.failing_applies.store(count, Ordering::SeqCst);
    }

    /// Number of `apply_delta` calls that reached the store.
    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> CounterResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CounterError::NetworkError(
                "In-memory store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn new_row(&self, subject: SubjectId, day: NaiveDate) -> DailyStats {
        DailyStats {
            id: self.next_row_id.fetch_add(1, Ordering::SeqCst),
            post_id: subject,
            date: day,
            views: 0,
            likes: 0,
            shares: 0,
        }
    }

    fn post_mut(&self, subject: SubjectId) -> CounterResult<RefMut<'_, SubjectId, PostTotals>> {
        if self.create_missing {
            return Ok(self
                .posts
                .entry(subject)
                .or_insert_with(|| PostTotals::new(subject)));
        }
        self.posts
            .get_mut(&subject)
            .ok_or_else(|| Self::not_found(subject))
    }

    fn not_found(subject: SubjectId) -> CounterError {
        CounterError::NotFound(format!("Post {} does not exist", subject))
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn apply_delta(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        amount: u64,
        day: NaiveDate,
    ) -> CounterResult<()> {
        self.check_online()?;
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        if !self.atomic_enabled.load(Ordering::SeqCst) {
            return Err(CounterError::Unsupported(
                "increment_post_stats is not available".to_string(),
            ));
        }
        if self
            .failing_applies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CounterError::TimedOut("Injected apply failure".to_string()));
        }

        let mut post = self.post_mut(subject)?;
        post.add(kind, amount);

        let mut row = self
            .daily
            .entry((subject, day))
            .or_insert_with(|| self.new_row(subject, day));
        let current = row.get(kind);
        row.set(kind, current.saturating_add(amount));

        trace!(store_op = "apply_delta", subject = %subject, kind = %kind, amount);
        Ok(())
    }

    async fn read_totals(&self, subject: SubjectId) -> CounterResult<Option<PostTotals>> {
        self.check_online()?;
        Ok(self.posts.get(&subject).map(|p| *p))
    }

    async fn write_total(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        value: u64,
    ) -> CounterResult<()> {
        self.check_online()?;
        self.post_mut(subject)?.set(kind, value);
        Ok(())
    }

    async fn read_daily(
        &self,
        subject: SubjectId,
        day: NaiveDate,
    ) -> CounterResult<Option<DailyStats>> {
        self.check_online()?;
        Ok(self.daily_row(subject, day))
    }

    async fn update_daily(&self, row_id: u64, kind: ActionKind, value: u64) -> CounterResult<()> {
        self.check_online()?;
        let mut row = self
            .daily
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or_else(|| CounterError::NotFound(format!("Daily row {} does not exist", row_id)))?;
        row.set(kind, value);
        Ok(())
    }

    async fn insert_daily(
        &self,
        subject: SubjectId,
        day: NaiveDate,
        kind: ActionKind,
        value: u64,
    ) -> CounterResult<()> {
        self.check_online()?;
        self.post_mut(subject)?;
        if self.daily.contains_key(&(subject, day)) {
            return Err(CounterError::ApiError {
                status: 409,
                message: format!("Daily row for {} on {} already exists", subject, day),
            });
        }
        let mut row = self.new_row(subject, day);
        row.set(kind, value);
        self.daily.insert((subject, day), row);
        Ok(())
    }

    async fn daily_series(
        &self,
        subject: SubjectId,
        since: NaiveDate,
    ) -> CounterResult<Vec<DailyStats>> {
        self.check_online()?;
        let mut rows: Vec<DailyStats> = self
            .daily
            .iter()
            .filter(|r| r.post_id == subject && r.date >= since)
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| r.date);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(id: u64) -> SubjectId {
        SubjectId::new(id).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_apply_delta_updates_totals_and_day_bucket() {
        let store = MemoryStore::with_posts([42]).unwrap();
        store
            .apply_delta(subject(42), ActionKind::View, 3, day(1))
            .await
            .unwrap();
        store
            .apply_delta(subject(42), ActionKind::View, 2, day(1))
            .await
            .unwrap();
        store
            .apply_delta(subject(42), ActionKind::Like, 1, day(2))
            .await
            .unwrap();

        let totals = store.totals(subject(42));
        assert_eq!(totals.views, 5);
        assert_eq!(totals.likes, 1);
        assert_eq!(store.daily_row(subject(42), day(1)).unwrap().views, 5);
        assert_eq!(store.daily_row(subject(42), day(2)).unwrap().likes, 1);
        assert_eq!(store.apply_calls(), 3);
    }

    #[tokio::test]
    async fn test_apply_delta_unknown_post() {
        let store = MemoryStore::new();
        let result = store
            .apply_delta(subject(9), ActionKind::View, 1, day(1))
            .await;
        assert!(matches!(result, Err(CounterError::NotFound(_))));
        assert!(store.daily_row(subject(9), day(1)).is_none());
    }

    #[tokio::test]
    async fn test_creating_store_accepts_unknown_posts() {
        let store = MemoryStore::creating_posts();
        store
            .apply_delta(subject(42), ActionKind::View, 2, day(1))
            .await
            .unwrap();
        assert_eq!(store.totals(subject(42)).views, 2);
        assert_eq!(store.daily_row(subject(42), day(1)).unwrap().views, 2);

        store
            .insert_daily(subject(7), day(1), ActionKind::Share, 1)
            .await
            .unwrap();
        assert!(store.read_totals(subject(7)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_atomic_disabled_is_unsupported() {
        let store = MemoryStore::with_posts([1]).unwrap();
        store.set_atomic_enabled(false);
        let result = store
            .apply_delta(subject(1), ActionKind::View, 1, day(1))
            .await;
        assert!(matches!(result, Err(CounterError::Unsupported(_))));
        assert_eq!(store.totals(subject(1)).views, 0);
    }

    #[tokio::test]
    async fn test_injected_failures_do_not_apply() {
        let store = MemoryStore::with_posts([1]).unwrap();
        store.fail_next_applies(1);

        let first = store
            .apply_delta(subject(1), ActionKind::Like, 4, day(1))
            .await;
        assert!(first.unwrap_err().is_transient());
        assert_eq!(store.totals(subject(1)).likes, 0);

        store
            .apply_delta(subject(1), ActionKind::Like, 4, day(1))
            .await
            .unwrap();
        assert_eq!(store.totals(subject(1)).likes, 4);
    }

    #[tokio::test]
    async fn test_row_level_operations() {
        let store = MemoryStore::with_posts([5]).unwrap();
        store
            .write_total(subject(5), ActionKind::Share, 11)
            .await
            .unwrap();
        assert_eq!(
            store.read_totals(subject(5)).await.unwrap().unwrap().shares,
            11
        );

        store
            .insert_daily(subject(5), day(3), ActionKind::View, 2)
            .await
            .unwrap();
        let row = store.read_daily(subject(5), day(3)).await.unwrap().unwrap();
        assert_eq!(row.views, 2);

        store
            .update_daily(row.id, ActionKind::View, 7)
            .await
            .unwrap();
        assert_eq!(store.daily_row(subject(5), day(3)).unwrap().views, 7);

        let duplicate = store
            .insert_daily(subject(5), day(3), ActionKind::View, 1)
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_daily_series_is_filtered_and_sorted() {
        let store = MemoryStore::with_posts([1, 2]).unwrap();
        for d in [4, 1, 3] {
            store
                .apply_delta(subject(1), ActionKind::View, d as u64, day(d))
                .await
                .unwrap();
        }
        store
            .apply_delta(subject(2), ActionKind::View, 1, day(4))
            .await
            .unwrap();

        let series = store.daily_series(subject(1), day(2)).await.unwrap();
        let dates: Vec<_> = series.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(3), day(4)]);
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let store = MemoryStore::with_posts([1]).unwrap();
        store.set_offline(true);
        assert!(store.read_totals(subject(1)).await.is_err());
        assert!(store
            .apply_delta(subject(1), ActionKind::View, 1, day(1))
            .await
            .unwrap_err()
            .is_unavailable());
        assert_eq!(store.apply_calls(), 0);
    }
}
