use super::state::AppState;
use crate::counter::{Outcome, PostStats};
use crate::error::{CounterError, CounterResult};
use crate::types::{ActionKind, ActorFingerprint, SubjectId};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Body of the view and like endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(alias = "postId")]
    pub subject_id: SubjectId,
    #[serde(default)]
    pub actor_fingerprint: Option<String>,
}

/// Body of the share endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    #[serde(alias = "postId")]
    pub subject_id: SubjectId,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

impl From<Outcome> for ActionResponse {
    fn from(outcome: Outcome) -> Self {
        Self {
            ok: true,
            cached: outcome == Outcome::AlreadyCounted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub ok: bool,
    pub synced: BTreeMap<&'static str, usize>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>, state: &AppState) -> CounterResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        state.metrics.actions.record_rejected();
        CounterError::InvalidArgument(rejection.body_text())
    })
}

/// Use the client's fingerprint, or derive one from the forwarding chain and
/// user agent when it sent none.
fn actor_for(provided: Option<&str>, headers: &HeaderMap) -> CounterResult<ActorFingerprint> {
    match provided.filter(|s| !s.trim().is_empty()) {
        Some(raw) => ActorFingerprint::new(raw),
        None => Ok(ActorFingerprint::derive(
            headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
            headers.get(USER_AGENT).and_then(|v| v.to_str().ok()),
        )),
    }
}

async fn record_with_actor(
    state: &AppState,
    kind: ActionKind,
    headers: &HeaderMap,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> CounterResult<Json<ActionResponse>> {
    let request = body(payload, state)?;
    let actor = actor_for(request.actor_fingerprint.as_deref(), headers).inspect_err(|_| {
        state.metrics.actions.record_rejected();
    })?;
    let outcome = state
        .service
        .record(kind, request.subject_id, Some(&actor))
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn view_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> CounterResult<Json<ActionResponse>> {
    record_with_actor(&state, ActionKind::View, &headers, payload).await
}

pub async fn like_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> CounterResult<Json<ActionResponse>> {
    record_with_actor(&state, ActionKind::Like, &headers, payload).await
}

pub async fn share_handler(
    State(state): State<AppState>,
    payload: Result<Json<ShareRequest>, JsonRejection>,
) -> CounterResult<Json<ActionResponse>> {
    let request = body(payload, &state)?;
    let outcome = state
        .service
        .record(ActionKind::Share, request.subject_id, None)
        .await?;
    Ok(Json(outcome.into()))
}

fn authorize_cron(state: &AppState, headers: &HeaderMap) -> CounterResult<()> {
    let Some(secret) = state.cron_secret.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(secret) {
        Ok(())
    } else {
        warn!("Rejected flush trigger with missing or wrong secret");
        Err(CounterError::Unauthorized(
            "Invalid cron secret".to_string(),
        ))
    }
}

pub async fn flush_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> CounterResult<Json<FlushResponse>> {
    authorize_cron(&state, &headers)?;

    let summary = state.reconciler.flush().await?;
    state.reader.invalidate_all();
    info!(flushed = summary.total_flushed(), "Flush triggered over HTTP");

    Ok(Json(FlushResponse {
        ok: true,
        synced: summary.synced(),
    }))
}

pub async fn stats_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> CounterResult<Json<PostStats>> {
    let subject: SubjectId = id.parse()?;
    let stats = state.reader.stats(subject).await?;
    Ok(Json(PostStats::clone(&stats)))
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
