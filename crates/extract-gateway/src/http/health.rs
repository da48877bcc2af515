use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health: liveness check, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "scheduled_jobs": state.coordinator.registry().len(),
        "runner": state.config.runner.base_url,
    }))
}

/// GET /due: every registered job plus the ids due right now.
pub async fn due_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.coordinator.registry();
    let now = Utc::now();
    Json(json!({
        "now": now,
        "due": registry.due_jobs(now),
        "jobs": registry.snapshot(),
    }))
}
