use crate::types::{ActionKind, SubjectId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Envelope returned by the Upstash REST endpoint for a single command.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstashReply {
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Error body produced by PostgREST.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostgrestErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// PostgREST code for "function not found in the schema cache".
pub const MISSING_FUNCTION_CODE: &str = "PGRST202";

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Arguments of the `increment_post_stats` stored procedure.
///
/// One call adds to the post totals and upserts the day bucket for the
/// database's current date. `shares_increment` is only sent when non-zero,
/// so view and like deltas match the three-argument form of the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaArgs {
    pub post_id_input: SubjectId,
    pub views_increment: u64,
    pub likes_increment: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub shares_increment: u64,
}

impl DeltaArgs {
    pub fn new(subject: SubjectId, kind: ActionKind, amount: u64) -> Self {
        let mut args = Self {
            post_id_input: subject,
            views_increment: 0,
            likes_increment: 0,
            shares_increment: 0,
        };
        match kind {
            ActionKind::View => args.views_increment = amount,
            ActionKind::Like => args.likes_increment = amount,
            ActionKind::Share => args.shares_increment = amount,
        }
        args
    }
}

/// Insert body for a new `daily_post_stats` row.
#[derive(Debug, Clone, Serialize)]
pub struct NewDailyRow {
    pub post_id: SubjectId,
    pub date: NaiveDate,
    pub views: u64,
    pub likes: u64,
    pub shares: u64,
}

impl NewDailyRow {
    pub fn new(subject: SubjectId, day: NaiveDate, kind: ActionKind, value: u64) -> Self {
        let mut row = Self {
            post_id: subject,
            date: day,
            views: 0,
            likes: 0,
            shares: 0,
        };
        match kind {
            ActionKind::View => row.views = value,
            ActionKind::Like => row.likes = value,
            ActionKind::Share => row.shares = value,
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_args_only_sets_one_field() {
        let args = DeltaArgs::new(SubjectId::new(42).unwrap(), ActionKind::Like, 3);
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "post_id_input": 42,
                "views_increment": 0,
                "likes_increment": 3
            })
        );
    }

    #[test]
    fn test_delta_args_share_sends_share_field() {
        let args = DeltaArgs::new(SubjectId::new(9).unwrap(), ActionKind::Share, 2);
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["shares_increment"], 2);
        assert_eq!(json["views_increment"], 0);
    }

    #[test]
    fn test_upstash_reply_error_form() {
        let reply: UpstashReply =
            serde_json::from_str(r#"{"error": "WRONGTYPE Operation"}"#).unwrap();
        assert!(reply.result.is_null());
        assert_eq!(reply.error.as_deref(), Some("WRONGTYPE Operation"));
    }
}
