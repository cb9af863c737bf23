use super::DurableStore;
use crate::api::types::{DeltaArgs, NewDailyRow, PostgrestErrorBody, MISSING_FUNCTION_CODE};
use crate::api::{Replay, RestClient};
use crate::config::HttpConfig;
use crate::error::{CounterError, CounterResult};
use crate::metrics::BackendMetrics;
use crate::types::{ActionKind, DailyStats, PostTotals, SubjectId};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, instrument};

const POST_COLUMNS: &str = "id,views,likes,shares";
const DAILY_COLUMNS: &str = "id,post_id,date,views,likes,shares";
/// Foreign key violation, raised when a day row references a deleted post.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Durable store reached through a Supabase PostgREST endpoint.
///
/// Totals live in `posts`, the daily breakdown in `daily_post_stats`, and
/// atomic deltas go through the `increment_post_stats` function.
pub struct PostgrestStore {
    rest: RestClient,
}

impl PostgrestStore {
    pub fn new(
        url: &str,
        key: &str,
        http: &HttpConfig,
        metrics: Arc<BackendMetrics>,
    ) -> CounterResult<Self> {
        let invalid = |_| CounterError::InvalidArgument("Invalid store key".to_string());
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(key).map_err(invalid)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key)).map_err(invalid)?,
        );

        let base = format!("{}/rest/v1", url.trim_end_matches('/'));
        Ok(Self {
            rest: RestClient::new(&base, headers, http, metrics)?,
        })
    }

    /// Map PostgREST error bodies onto the pipeline's error kinds.
    fn classify(error: CounterError) -> CounterError {
        match error {
            CounterError::ApiError { status, message } => {
                let body: PostgrestErrorBody = serde_json::from_str(&message).unwrap_or_default();
                match body.code.as_deref() {
                    Some(MISSING_FUNCTION_CODE) => CounterError::Unsupported(
                        body.message.unwrap_or(message),
                    ),
                    _ if status == 404 => CounterError::Unsupported(message),
                    Some(FOREIGN_KEY_VIOLATION) => CounterError::NotFound(
                        body.message.unwrap_or(message),
                    ),
                    _ => CounterError::ApiError { status, message },
                }
            }
            other => other,
        }
    }

    /// PATCH `path` with a single-column body and report whether a row matched.
    async fn patch_column(
        &self,
        endpoint: &str,
        path: &str,
        kind: ActionKind,
        value: u64,
    ) -> CounterResult<bool> {
        let mut body = serde_json::Map::new();
        body.insert(kind.field().to_string(), value.into());
        let response = self
            .rest
            .send(endpoint, Replay::Safe, || {
                self.rest
                    .request(Method::PATCH, path)
                    .header("Prefer", "return=representation")
                    .json(&body)
            })
            .await?;
        let rows: Vec<serde_json::Value> = response.json().await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl DurableStore for PostgrestStore {
    #[instrument(skip(self), fields(store_op = "apply_delta"))]
    async fn apply_delta(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        amount: u64,
        _day: NaiveDate,
    ) -> CounterResult<()> {
        let args = DeltaArgs::new(subject, kind, amount);
        // A replay after a lost response would apply the delta twice
        self.rest
            .send("rpc/increment_post_stats", Replay::Never, || {
                self.rest
                    .request(Method::POST, "/rpc/increment_post_stats")
                    .json(&args)
            })
            .await
            .map_err(Self::classify)?;
        debug!(subject = %subject, kind = %kind, amount, "Delta applied");
        Ok(())
    }

    #[instrument(skip(self), fields(store_op = "read_totals"))]
    async fn read_totals(&self, subject: SubjectId) -> CounterResult<Option<PostTotals>> {
        let path = format!("/posts?id=eq.{}&select={}", subject, POST_COLUMNS);
        let rows: Vec<PostTotals> = self
            .rest
            .get_json("posts", &path)
            .await
            .map_err(Self::classify)?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self), fields(store_op = "write_total"))]
    async fn write_total(
        &self,
        subject: SubjectId,
        kind: ActionKind,
        value: u64,
    ) -> CounterResult<()> {
        let path = format!("/posts?id=eq.{}&select=id", subject);
        let matched = self
            .patch_column("posts", &path, kind, value)
            .await
            .map_err(Self::classify)?;
        if !matched {
            return Err(CounterError::NotFound(format!(
                "Post {} does not exist",
                subject
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(store_op = "read_daily"))]
    async fn read_daily(
        &self,
        subject: SubjectId,
        day: NaiveDate,
    ) -> CounterResult<Option<DailyStats>> {
        let path = format!(
            "/daily_post_stats?post_id=eq.{}&date=eq.{}&select={}&limit=1",
            subject, day, DAILY_COLUMNS
        );
        let rows: Vec<DailyStats> = self
            .rest
            .get_json("daily_post_stats", &path)
            .await
            .map_err(Self::classify)?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self), fields(store_op = "update_daily"))]
    async fn update_daily(&self, row_id: u64, kind: ActionKind, value: u64) -> CounterResult<()> {
        let path = format!("/daily_post_stats?id=eq.{}&select=id", row_id);
        let matched = self
            .patch_column("daily_post_stats", &path, kind, value)
            .await
            .map_err(Self::classify)?;
        if !matched {
            return Err(CounterError::NotFound(format!(
                "Daily row {} does not exist",
                row_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(store_op = "insert_daily"))]
    async fn insert_daily(
        &self,
        subject: SubjectId,
        day: NaiveDate,
        kind: ActionKind,
        value: u64,
    ) -> CounterResult<()> {
        let row = NewDailyRow::new(subject, day, kind, value);
        self.rest
            .send("daily_post_stats", Replay::Never, || {
                self.rest
                    .request(Method::POST, "/daily_post_stats")
                    .header("Prefer", "return=minimal")
                    .json(&row)
            })
            .await
            .map_err(Self::classify)?;
        Ok(())
    }

    #[instrument(skip(self), fields(store_op = "daily_series"))]
    async fn daily_series(
        &self,
        subject: SubjectId,
        since: NaiveDate,
    ) -> CounterResult<Vec<DailyStats>> {
        let path = format!(
            "/daily_post_stats?post_id=eq.{}&date=gte.{}&select={}&order=date.asc",
            subject, since, DAILY_COLUMNS
        );
        self.rest
            .get_json("daily_post_stats", &path)
            .await
            .map_err(Self::classify)
    }
}
