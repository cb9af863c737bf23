use super::{ActionKind, SubjectId};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

/// Durable per-post totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTotals {
    pub id: SubjectId,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub views: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub likes: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub shares: u64,
}

impl PostTotals {
    pub fn new(id: SubjectId) -> Self {
        Self {
            id,
            views: 0,
            likes: 0,
            shares: 0,
        }
    }

    pub fn get(&self, kind: ActionKind) -> u64 {
        match kind {
            ActionKind::View => self.views,
            ActionKind::Like => self.likes,
            ActionKind::Share => self.shares,
        }
    }

    pub fn set(&mut self, kind: ActionKind, value: u64) {
        match kind {
            ActionKind::View => self.views = value,
            ActionKind::Like => self.likes = value,
            ActionKind::Share => self.shares = value,
        }
    }

    pub fn add(&mut self, kind: ActionKind, amount: u64) {
        let current = self.get(kind);
        self.set(kind, current.saturating_add(amount));
    }
}

/// One row of the per-day breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub id: u64,
    pub post_id: SubjectId,
    pub date: NaiveDate,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub views: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub likes: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub shares: u64,
}

impl DailyStats {
    pub fn get(&self, kind: ActionKind) -> u64 {
        match kind {
            ActionKind::View => self.views,
            ActionKind::Like => self.likes,
            ActionKind::Share => self.shares,
        }
    }

    pub fn set(&mut self, kind: ActionKind, value: u64) {
        match kind {
            ActionKind::View => self.views = value,
            ActionKind::Like => self.likes = value,
            ActionKind::Share => self.shares = value,
        }
    }
}

/// Outcome of one reconciliation pass over a single action kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindFlush {
    /// Keys applied to durable storage and cleared
    pub flushed: usize,
    /// Keys left in place for the next run after a failure
    pub retained: usize,
    /// Keys kept because their post does not exist in durable storage
    pub orphaned: usize,
    /// Keys whose name or value could not be parsed; left in place
    pub malformed: usize,
    /// Keys applied through the non-atomic fallback
    pub degraded: usize,
    /// Another run held the flush lock; nothing was scanned
    pub contended: bool,
    /// The cache could not be scanned for this kind
    pub failed: bool,
}

/// Per-kind results of a full reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub kinds: BTreeMap<ActionKind, KindFlush>,
}

impl FlushSummary {
    pub fn flushed(&self, kind: ActionKind) -> usize {
        self.kinds.get(&kind).map(|k| k.flushed).unwrap_or(0)
    }

    pub fn total_flushed(&self) -> usize {
        self.kinds.values().map(|k| k.flushed).sum()
    }

    pub fn total_retained(&self) -> usize {
        self.kinds.values().map(|k| k.retained).sum()
    }

    pub fn failed_kinds(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.kinds
            .iter()
            .filter(|(_, k)| k.failed)
            .map(|(kind, _)| *kind)
    }

    /// Flushed key counts keyed by plural kind name, e.g. `{"views": 3}`.
    pub fn synced(&self) -> BTreeMap<&'static str, usize> {
        ActionKind::all()
            .map(|kind| (kind.prefix(), self.flushed(kind)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_null_columns() {
        let totals: PostTotals =
            serde_json::from_str(r#"{"id": 42, "views": null, "likes": 3}"#).unwrap();
        assert_eq!(totals.views, 0);
        assert_eq!(totals.likes, 3);
        assert_eq!(totals.shares, 0);
    }

    #[test]
    fn test_totals_add_per_kind() {
        let mut totals = PostTotals::new(SubjectId::new(1).unwrap());
        totals.add(ActionKind::Like, 2);
        totals.add(ActionKind::Like, 3);
        assert_eq!(totals.get(ActionKind::Like), 5);
        assert_eq!(totals.get(ActionKind::View), 0);
    }

    #[test]
    fn test_summary_synced_lists_every_kind() {
        let mut summary = FlushSummary::default();
        summary.kinds.insert(
            ActionKind::View,
            KindFlush {
                flushed: 2,
                ..Default::default()
            },
        );
        let synced = summary.synced();
        assert_eq!(synced.get("views"), Some(&2));
        assert_eq!(synced.get("likes"), Some(&0));
        assert_eq!(synced.get("shares"), Some(&0));
        assert_eq!(summary.total_flushed(), 2);
    }
}
