use thiserror::Error;

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A recurrence configuration failed validation. `field` names the
    /// offending cron field (or `window`, `every`, `recurrence`).
    #[error("Invalid {field}: {reason}")]
    InvalidSpec { field: String, reason: String },

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored recurrence could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No task with the given id exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: i64 },

    /// No project with the given id exists in the store.
    #[error("Project not found: {id}")]
    ProjectNotFound { id: i64 },
}

impl ScheduleError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ScheduleError::InvalidSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short error code string returned to control-surface clients.
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::InvalidSpec { .. } => "INVALID_SPEC",
            ScheduleError::Database(_) => "DATABASE_ERROR",
            ScheduleError::Serialization(_) => "SERIALIZATION_ERROR",
            ScheduleError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            ScheduleError::ProjectNotFound { .. } => "PROJECT_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
