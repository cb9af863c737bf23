//! Durable relational store holding per-post totals and the daily breakdown.

pub mod memory;
pub mod postgrest;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

use crate::error::CounterResult;
use crate::types::{ActionKind, DailyStats, PostTotals, SubjectId};
use async_trait::async_trait;
use chrono::NaiveDate;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Atomically add `amount` to the post's `kind` total and to the day
    /// bucket for `day`.
    ///
    /// Fails with `NotFound` when the post does not exist and with
    /// `Unsupported` when the backend has no atomic primitive.
    async fn apply_delta(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        amount: u64,
        day: NaiveDate,
    ) -> CounterResult<()>;

    async fn read_totals(&self, subject: SubjectId) -> CounterResult<Option<PostTotals>>;

    /// Overwrite one total with an absolute value.
    async fn write_total(&self, subject: SubjectId, kind: ActionKind, value: u64)
        -> CounterResult<()>;

    async fn read_daily(&self, subject: SubjectId, day: NaiveDate)
        -> CounterResult<Option<DailyStats>>;

    /// Overwrite one column of an existing day row.
    async fn update_daily(&self, row_id: u64, kind: ActionKind, value: u64) -> CounterResult<()>;

    async fn insert_daily(
        &self,
        subject: SubjectId,
        day: NaiveDate,
        kind: ActionKind,
        value: u64,
    ) -> CounterResult<()>;

    /// Day rows for `subject` dated `since` or later, oldest first.
    async fn daily_series(&self, subject: SubjectId, since: NaiveDate)
        -> CounterResult<Vec<DailyStats>>;
}
