//! Trigger control surface: add/remove/run/cancel plus the task lifecycle
//! actions. Every handler is idempotent in the sense the registry is:
//! repeating a request leaves the same registry state.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use extract_core::TaskId;
use extract_runner::{FireOutcome, RunError};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{reject, ApiError};
use crate::app::AppState;

/// GET /add/{id}: register the task with its effective recurrence.
pub async fn add_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let next = state.coordinator.add_job(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task_id": id, "scheduled": true, "next_run": next })))
}

/// GET /delete/{id}: drop the task from the registry.
pub async fn remove_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.coordinator.remove_job(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task_id": id, "removed": removed })))
}

/// GET /run/{id}: start a cycle now. The cycle runs in the background;
/// 202 means it was accepted, 409 that the task is already running.
pub async fn run_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let task_id = TaskId(id);
    state.coordinator.tasks().task(task_id).map_err(|e| reject(e.into()))?;
    if state.coordinator.is_running(task_id) {
        return Err(reject(RunError::DuplicateTrigger { task_id: id }));
    }

    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move {
        match coordinator.run_now(task_id).await {
            Ok(FireOutcome::Duplicate) => {}
            Ok(outcome) => info!(task_id = %task_id, ?outcome, "manual run finished"),
            Err(e) => warn!(task_id = %task_id, error = %e, code = e.code(), "manual run failed"),
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "task_id": id, "accepted": true })),
    ))
}

/// GET /cancel/{id}: end the retry loop of the current cycle.
pub async fn cancel_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.coordinator.cancel_retry(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task_id": id, "canceled": true })))
}

/// GET /reset/{id}: close any open cycle and return the task to idle.
/// 409 while an attempt is in flight.
pub async fn reset_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let closed = state.coordinator.reset_task(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task_id": id, "reset": true, "closed_cycle": closed })))
}

pub async fn enable_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let next = state.coordinator.enable_task(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task_id": id, "enabled": true, "next_run": next })))
}

pub async fn disable_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.coordinator.disable_task(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task_id": id, "enabled": false })))
}

/// GET /duplicate/{id}: returns the new (disabled) task.
pub async fn duplicate_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let copy = state.coordinator.duplicate_task(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task": copy })))
}

/// DELETE /tasks/{id}: remove the task and its audit history.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.coordinator.delete_task(TaskId(id)).await.map_err(reject)?;
    Ok(Json(json!({ "task_id": id, "deleted": true })))
}
