use extract_scheduler::ScheduleError;
use thiserror::Error;

/// Errors that can occur while driving a run cycle.
#[derive(Debug, Error)]
pub enum RunError {
    /// Another run of the same task holds the execution lock.
    /// Logged and skipped, never surfaced as a task failure.
    #[error("Task {task_id} is already running")]
    DuplicateTrigger { task_id: i64 },

    /// The external runner reported failure, errored or timed out.
    #[error("Runner failure: {0}")]
    RunnerFailure(String),

    /// The cycle used its whole retry budget.
    #[error("Task {task_id} failed after {attempts} attempts")]
    RetriesExhausted { task_id: i64, attempts: u32 },

    /// An audit append could not be made durable after bounded retries.
    /// The cycle stops where it is; recovery closes it on the next start.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Task not found: {id}")]
    TaskNotFound { id: i64 },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RunError {
    /// Short error code string returned to control-surface clients.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::DuplicateTrigger { .. } => "DUPLICATE_TRIGGER",
            RunError::RunnerFailure(_) => "RUNNER_FAILURE",
            RunError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            RunError::Persistence(_) => "PERSISTENCE_FAILURE",
            RunError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            RunError::Schedule(e) => e.code(),
            RunError::Database(_) => "DATABASE_ERROR",
            RunError::Http(_) => "HTTP_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;
