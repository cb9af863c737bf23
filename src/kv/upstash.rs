use super::KvStore;
use crate::api::types::UpstashReply;
use crate::api::{Replay, RestClient};
use crate::config::HttpConfig;
use crate::error::{CounterError, CounterResult};
use crate::metrics::BackendMetrics;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, trace};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const DEL_IF_EQ_SCRIPT: &str =
    "if redis.call('GET', KEYS[1]) == ARGV[1] then return redis.call('DEL', KEYS[1]) else return 0 end";

/// Subtracts ARGV[1] from KEYS[1] only if it exists, deleting it at zero or
/// below. Returns the remainder, or nil when the key was absent.
const DECR_EXISTING_SCRIPT: &str = "if redis.call('EXISTS', KEYS[1]) == 0 then return nil end \
     local n = redis.call('DECRBY', KEYS[1], ARGV[1]) \
     if n <= 0 then redis.call('DEL', KEYS[1]) end \
     return n";

const SCAN_PAGE: &str = "500";

/// Redis cache reached through the Upstash REST protocol: each command is a
/// JSON array posted to the database URL with a bearer token.
pub struct UpstashKv {
    rest: RestClient,
}

impl UpstashKv {
    pub fn new(
        url: &str,
        token: &str,
        http: &HttpConfig,
        metrics: Arc<BackendMetrics>,
    ) -> CounterResult<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| CounterError::InvalidArgument("Invalid Upstash token".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);

        Ok(Self {
            rest: RestClient::new(url, headers, http, metrics)?,
        })
    }

    async fn command(&self, args: Vec<String>, replay: Replay) -> CounterResult<Value> {
        let name = args.first().cloned().unwrap_or_default();
        trace!(kv_op = %name);

        let reply: UpstashReply = match self.rest.post_json(&name, "/", &args, replay).await {
            Ok(reply) => reply,
            // Upstash reports command errors as 400 with an `error` body
            Err(CounterError::ApiError { status: 400, message }) => {
                let detail = serde_json::from_str::<UpstashReply>(&message)
                    .ok()
                    .and_then(|r| r.error)
                    .unwrap_or(message);
                return Err(CounterError::ApiError {
                    status: 400,
                    message: detail,
                });
            }
            Err(e) => return Err(e),
        };

        match reply.error {
            Some(error) => Err(CounterError::ApiError {
                status: 400,
                message: error,
            }),
            None => Ok(reply.result),
        }
    }
}

fn ttl_args(args: &mut Vec<String>, ttl: Option<Duration>) {
    if let Some(ttl) = ttl {
        // Redis rejects EX 0
        args.push("EX".to_string());
        args.push(ttl.as_secs().max(1).to_string());
    }
}

fn as_integer(value: &Value) -> CounterResult<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| CounterError::ParseError(format!("Expected integer, got {}", n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| CounterError::ParseError(format!("Expected integer, got {}", s))),
        other => Err(CounterError::ParseError(format!(
            "Expected integer, got {}",
            other
        ))),
    }
}

fn as_optional_integer(value: &Value) -> CounterResult<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        other => as_integer(other).map(Some),
    }
}

fn as_optional_string(value: Value) -> CounterResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(CounterError::ParseError(format!(
            "Expected string, got {}",
            other
        ))),
    }
}

/// Escape glob metacharacters so a literal prefix can be used in MATCH.
fn glob_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

fn parse_scan_page(value: Value) -> CounterResult<(String, Vec<String>)> {
    let parse_err = || CounterError::ParseError("Malformed SCAN reply".to_string());
    let Value::Array(mut parts) = value else {
        return Err(parse_err());
    };
    if parts.len() != 2 {
        return Err(parse_err());
    }
    let keys = match parts.pop() {
        Some(Value::Array(keys)) => keys
            .into_iter()
            .map(|k| match k {
                Value::String(s) => Ok(s),
                _ => Err(parse_err()),
            })
            .collect::<CounterResult<Vec<_>>>()?,
        _ => return Err(parse_err()),
    };
    let cursor = match parts.pop() {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(parse_err()),
    };
    Ok((cursor, keys))
}

#[async_trait]
impl KvStore for UpstashKv {
    #[instrument(skip(self), fields(kv_op = "get"))]
    async fn get(&self, key: &str) -> CounterResult<Option<String>> {
        let value = self
            .command(vec!["GET".into(), key.into()], Replay::Safe)
            .await?;
        as_optional_string(value)
    }

    #[instrument(skip(self, value), fields(kv_op = "set"))]
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<()> {
        let mut args = vec!["SET".to_string(), key.to_string(), value.to_string()];
        ttl_args(&mut args, ttl);
        self.command(args, Replay::Safe).await?;
        Ok(())
    }

    #[instrument(skip(self, value), fields(kv_op = "set_nx"))]
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<bool> {
        let mut args = vec!["SET".to_string(), key.to_string(), value.to_string()];
        ttl_args(&mut args, ttl);
        args.push("NX".to_string());
        // A replayed NX after a lost reply would report the key as taken
        let value = self.command(args, Replay::Never).await?;
        Ok(!value.is_null())
    }

    #[instrument(skip(self), fields(kv_op = "incr_by"))]
    async fn incr_by(&self, key: &str, amount: u64) -> CounterResult<i64> {
        let value = self
            .command(
                vec!["INCRBY".into(), key.into(), amount.to_string()],
                Replay::Never,
            )
            .await?;
        as_integer(&value)
    }

    #[instrument(skip(self), fields(kv_op = "decr_existing"))]
    async fn decr_existing(&self, key: &str, amount: u64) -> CounterResult<Option<i64>> {
        let value = self
            .command(
                vec![
                    "EVAL".into(),
                    DECR_EXISTING_SCRIPT.into(),
                    "1".into(),
                    key.into(),
                    amount.to_string(),
                ],
                Replay::Never,
            )
            .await?;
        as_optional_integer(&value)
    }

    #[instrument(skip(self), fields(kv_op = "del"))]
    async fn del(&self, key: &str) -> CounterResult<bool> {
        let value = self
            .command(vec!["DEL".into(), key.into()], Replay::Safe)
            .await?;
        Ok(as_integer(&value)? > 0)
    }

    #[instrument(skip(self), fields(kv_op = "del_if_eq"))]
    async fn del_if_eq(&self, key: &str, expected: &str) -> CounterResult<bool> {
        let value = self
            .command(
                vec![
                    "EVAL".into(),
                    DEL_IF_EQ_SCRIPT.into(),
                    "1".into(),
                    key.into(),
                    expected.into(),
                ],
                Replay::Never,
            )
            .await?;
        Ok(as_integer(&value)? > 0)
    }

    #[instrument(skip(self), fields(kv_op = "keys"))]
    async fn keys(&self, prefix: &str) -> CounterResult<Vec<String>> {
        let pattern = glob_prefix(prefix);
        let mut cursor = "0".to_string();
        // SCAN may return a key more than once
        let mut keys = BTreeSet::new();

        loop {
            let value = self
                .command(
                    vec![
                        "SCAN".into(),
                        cursor.clone(),
                        "MATCH".into(),
                        pattern.clone(),
                        "COUNT".into(),
                        SCAN_PAGE.into(),
                    ],
                    Replay::Safe,
                )
                .await?;
            let (next, page) = parse_scan_page(value)?;
            keys.extend(page);
            if next == "0" {
                break;
            }
            cursor = next;
        }

        Ok(keys.into_iter().collect())
    }
}
