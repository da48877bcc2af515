use std::sync::Arc;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use extract_core::ExtractConfig;
use extract_runner::Coordinator;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ExtractConfig,
    pub coordinator: Arc<Coordinator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ExtractConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            config,
            coordinator,
            started_at: Utc::now(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{control, health, history};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/due", get(health::due_handler))
        .route("/add/{id}", get(control::add_job))
        .route("/delete/{id}", get(control::remove_job))
        .route("/run/{id}", get(control::run_now))
        .route("/cancel/{id}", get(control::cancel_retry))
        .route("/reset/{id}", get(control::reset_task))
        .route("/enable/{id}", get(control::enable_task))
        .route("/disable/{id}", get(control::disable_task))
        .route("/duplicate/{id}", get(control::duplicate_task))
        .route("/tasks/{id}", axum::routing::delete(control::delete_task))
        .route("/status/{id}", get(history::status_handler))
        .route("/history/{id}", get(history::history_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
