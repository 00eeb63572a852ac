use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::AppState;

#[derive(Deserialize)]
pub struct CursorOverride {
    pub value: String,
}

pub async fn health() -> &'static str {
    "ok"
}

/// Scheduler state, last poll outcome, and per-job detail.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut jobs = serde_json::Map::new();
    for name in state.scheduler.job_names().await {
        let status = state.scheduler.status(&name).await;
        jobs.insert(name, json!(status));
    }
    let stats = state.service.stats();
    let processed = match state.cursors.processed_ids().await {
        Ok(ids) => ids.len(),
        Err(e) => return internal_error("list processed ids", e),
    };
    let next_check = state.scheduler.status("poll_mentions").await.next_run;
    Json(json!({
        "running": state.scheduler.is_running(),
        "last_check": stats.last_check,
        "next_check": next_check,
        "last_error": stats.last_error,
        "processed_count": processed,
        "jobs": jobs,
    }))
    .into_response()
}

pub async fn start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.scheduler.start();
    Json(json!({ "running": true }))
}

/// Stops the schedules and drains in-flight work before responding.
pub async fn stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.scheduler.stop().await;
    Json(json!({ "running": false }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.service.stats();
    let cursor = match state.service.cursor_value().await {
        Ok(cursor) => cursor,
        Err(e) => return internal_error("read cursor", e),
    };
    let processed = match state.cursors.processed_ids().await {
        Ok(ids) => ids,
        Err(e) => return internal_error("list processed ids", e),
    };
    let trends = match state.trends.latest().await {
        Ok(snapshot) => json!(snapshot),
        Err(e) => return internal_error("read trend snapshot", e),
    };
    Json(json!({
        "stats": stats,
        "cursor": cursor,
        "processed_count": processed.len(),
        "processed_ids": processed,
        "trends": trends,
    }))
    .into_response()
}

pub async fn job_detail(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let status = state.scheduler.status(&name).await;
    if status.status == magpie_pipeline::JobState::NotFound {
        return (StatusCode::NOT_FOUND, Json(json!(status))).into_response();
    }
    Json(json!(status)).into_response()
}

/// Operator cursor override. The one sanctioned way to rewind polling.
pub async fn set_cursor(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CursorOverride>,
) -> impl IntoResponse {
    match state.cursors.force_set(&body.value).await {
        Ok(cursor) => Json(json!({ "cursor": cursor.value })).into_response(),
        Err(e) => internal_error("override cursor", e),
    }
}

fn internal_error(op: &str, e: magpie_common::MagpieError) -> axum::response::Response {
    warn!(op, error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}
