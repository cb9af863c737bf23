use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// A countable reader action.
///
/// Each kind has its own dedup window, its own pending-counter keyspace, and
/// its own column in durable storage.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ActionKind {
    View,
    Like,
    Share,
}

impl ActionKind {
    /// Key prefix shared by every cache entry of this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            ActionKind::View => "views",
            ActionKind::Like => "likes",
            ActionKind::Share => "shares",
        }
    }

    /// Column name of the aggregate in `posts` and `daily_post_stats`.
    pub fn field(self) -> &'static str {
        self.prefix()
    }

    /// Whether the action carries an actor that can be deduplicated.
    pub fn has_actor(self) -> bool {
        !matches!(self, ActionKind::Share)
    }

    pub fn all() -> impl Iterator<Item = ActionKind> {
        ActionKind::iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_prefixes_are_distinct() {
        let prefixes: std::collections::HashSet<_> = ActionKind::all().map(|k| k.prefix()).collect();
        assert_eq!(prefixes.len(), 3);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(ActionKind::from_str("view").unwrap(), ActionKind::View);
        assert_eq!(ActionKind::from_str("LIKE").unwrap(), ActionKind::Like);
        assert!(ActionKind::from_str("unlike").is_err());
        assert_eq!(ActionKind::Share.to_string(), "share");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ActionKind::View).unwrap();
        assert_eq!(json, "\"view\"");
        let kind: ActionKind = serde_json::from_str("\"share\"").unwrap();
        assert_eq!(kind, ActionKind::Share);
    }

    #[test]
    fn test_share_has_no_actor() {
        assert!(ActionKind::View.has_actor());
        assert!(ActionKind::Like.has_actor());
        assert!(!ActionKind::Share.has_actor());
    }
}
