use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use extract_core::TaskId;
use extract_runner::{HistoryPage, HistoryQuery, TaskStatus};

use super::{reject, ApiError};
use crate::app::AppState;

/// GET /status/{id}: derived run state, e.g. "Running (attempt 2 of 3)".
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TaskStatus>, ApiError> {
    state
        .coordinator
        .task_status(TaskId(id))
        .map(Json)
        .map_err(reject)
}

/// GET /history/{id}?job_id=&page=&per_page=&sort=&order=
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    state
        .coordinator
        .history(TaskId(id), &query)
        .map(Json)
        .map_err(reject)
}
