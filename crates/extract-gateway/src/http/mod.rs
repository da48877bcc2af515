pub mod control;
pub mod health;
pub mod history;

use axum::{http::StatusCode, Json};
use extract_runner::RunError;
use extract_scheduler::ScheduleError;
use serde_json::{json, Value};

/// Error half of every handler result: a status plus `{"error", "code"}`.
pub type ApiError = (StatusCode, Json<Value>);

pub fn reject(e: RunError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        tracing::error!(error = %e, code = e.code(), "request failed");
    }
    (status, Json(json!({ "error": e.to_string(), "code": e.code() })))
}

fn status_for(e: &RunError) -> StatusCode {
    match e {
        RunError::TaskNotFound { .. }
        | RunError::Schedule(ScheduleError::TaskNotFound { .. })
        | RunError::Schedule(ScheduleError::ProjectNotFound { .. }) => StatusCode::NOT_FOUND,
        RunError::Schedule(ScheduleError::InvalidSpec { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        RunError::DuplicateTrigger { .. } => StatusCode::CONFLICT,
        RunError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
