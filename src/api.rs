// src/api.rs
// Ops surface: health, stats snapshots, and the two operational toggles.
// Management CRUD lives in an external layer; nothing here mutates source
// definitions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::scheduler::SchedulerHandle;
use crate::stats::DiagnosticsHub;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerHandle,
    pub diagnostics: Arc<DiagnosticsHub>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/stats", get(stats))
        .route("/stats/scheduler", get(scheduler_snapshot))
        .route("/admin/aggressive-mode", post(set_aggressive_mode))
        .route("/admin/interval", post(override_interval))
        .route("/admin/poll/{source_id}", post(poll_now))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let category = params.get("category").map(String::as_str);
    let stats = state.diagnostics.snapshot(category);
    let scheduler = state.scheduler.snapshot().await;
    Json(json!({
        "stats": stats,
        "scheduler": scheduler,
    }))
}

async fn scheduler_snapshot(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "scheduler": state.scheduler.snapshot().await }))
}

#[derive(Deserialize)]
struct AggressiveModeReq {
    enabled: bool,
}

async fn set_aggressive_mode(
    State(state): State<AppState>,
    Json(body): Json<AggressiveModeReq>,
) -> Json<serde_json::Value> {
    state.scheduler.set_aggressive_mode(body.enabled);
    Json(json!({ "aggressive_mode": body.enabled }))
}

#[derive(Deserialize)]
struct IntervalOverrideReq {
    source_id: Option<String>,
    category: Option<String>,
    interval_secs: u64,
}

/// Per-source or per-category interval override, applied on the next
/// scheduling tick.
async fn override_interval(
    State(state): State<AppState>,
    Json(body): Json<IntervalOverrideReq>,
) -> (StatusCode, Json<serde_json::Value>) {
    match (&body.source_id, &body.category) {
        (Some(source_id), _) => {
            state.scheduler.update_interval(source_id, body.interval_secs);
            (
                StatusCode::OK,
                Json(json!({ "source_id": source_id, "interval_secs": body.interval_secs })),
            )
        }
        (None, Some(category)) => {
            state
                .scheduler
                .update_category_interval(category, body.interval_secs);
            (
                StatusCode::OK,
                Json(json!({ "category": category, "interval_secs": body.interval_secs })),
            )
        }
        (None, None) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "source_id or category required" })),
        ),
    }
}

async fn poll_now(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.scheduler.poll_now(&source_id);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "requested": source_id })),
    )
}
