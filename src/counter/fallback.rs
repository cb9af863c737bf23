use crate::error::{CounterError, CounterResult};
use crate::store::DurableStore;
use crate::types::{ActionKind, SubjectId};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::warn;

/// Degraded apply path for stores without an atomic delta primitive.
///
/// Reads the total and writes back `current + amount`, then upserts the day
/// bucket the same way. Concurrent writers to the same post can lose
/// updates; this path only runs when explicitly enabled.
pub struct FallbackApplier {
    store: Arc<dyn DurableStore>,
}

impl FallbackApplier {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Apply `amount` to the total and then to the day bucket.
    ///
    /// Once the total is written the call succeeds even if the day bucket
    /// update fails: reporting failure then would make the next flush add the
    /// amount to the total a second time.
    pub async fn apply(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        amount: u64,
        day: NaiveDate,
    ) -> CounterResult<()> {
        let totals = self
            .store
            .read_totals(subject)
            .await?
            .ok_or_else(|| CounterError::NotFound(format!("Post {} does not exist", subject)))?;
        let updated = totals.get(kind).saturating_add(amount);
        self.store.write_total(subject, kind, updated).await?;

        if let Err(e) = self.upsert_day(subject, kind, amount, day).await {
            warn!(
                subject = %subject,
                kind = %kind,
                amount,
                error = %e,
                "Total updated but day bucket was not"
            );
        }
        Ok(())
    }

    async fn upsert_day(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        amount: u64,
        day: NaiveDate,
    ) -> CounterResult<()> {
        match self.store.read_daily(subject, day).await? {
            Some(row) => {
                let value = row.get(kind).saturating_add(amount);
                self.store.update_daily(row.id, kind, value).await
            }
            None => self.store.insert_daily(subject, day, kind, amount).await,
        }
    }
}
