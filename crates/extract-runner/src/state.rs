use chrono::{DateTime, Utc};
use extract_core::{AuditRecord, JobId, StatusKind, TaskId};
use serde::Serialize;

/// Where a task's latest run cycle stands, derived from its audit records.
///
/// Never stored: the audit log is the source of truth and this is a fold
/// over one cycle's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskRunState {
    Idle,
    /// Accepted, waiting for attempt `attempt` to start.
    Queued { job_id: JobId, attempt: u32 },
    Running { job_id: JobId, attempt: u32 },
    Succeeded { job_id: JobId },
    Failed { job_id: JobId, attempts: u32 },
    Canceled { job_id: JobId },
}

impl TaskRunState {
    /// Fold the records of one cycle, oldest first.
    pub fn from_cycle(records: &[AuditRecord]) -> Self {
        let mut state = TaskRunState::Idle;
        let mut last_attempt = 0;
        for record in records {
            let Some(job_id) = record.job_id.clone() else {
                continue;
            };
            if let Some(attempt) = record.attempt {
                last_attempt = attempt;
            }
            state = match record.status {
                StatusKind::Info => continue,
                StatusKind::Started => TaskRunState::Queued { job_id, attempt: 1 },
                StatusKind::Running => TaskRunState::Running {
                    job_id,
                    attempt: last_attempt.max(1),
                },
                StatusKind::AttemptFailed => TaskRunState::Queued {
                    job_id,
                    attempt: last_attempt + 1,
                },
                StatusKind::Succeeded => TaskRunState::Succeeded { job_id },
                StatusKind::Failed => TaskRunState::Failed {
                    job_id,
                    attempts: last_attempt,
                },
                StatusKind::Canceled => TaskRunState::Canceled { job_id },
            };
        }
        state
    }

    /// True while the cycle has not reached a terminal record.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            TaskRunState::Queued { .. } | TaskRunState::Running { .. }
        )
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            TaskRunState::Idle => None,
            TaskRunState::Queued { job_id, .. }
            | TaskRunState::Running { job_id, .. }
            | TaskRunState::Succeeded { job_id }
            | TaskRunState::Failed { job_id, .. }
            | TaskRunState::Canceled { job_id } => Some(job_id),
        }
    }

    /// Operator-facing one-liner, e.g. "Running (attempt 2 of 3)".
    pub fn describe(&self, max_retries: u32) -> String {
        let total = max_retries + 1;
        match self {
            TaskRunState::Idle => "Idle".to_string(),
            TaskRunState::Queued { attempt: 1, .. } => "Queued".to_string(),
            TaskRunState::Queued { attempt, .. } => {
                format!("Waiting to retry (attempt {attempt} of {total})")
            }
            TaskRunState::Running { attempt, .. } => {
                format!("Running (attempt {attempt} of {total})")
            }
            TaskRunState::Succeeded { .. } => "Succeeded".to_string(),
            TaskRunState::Failed { attempts, .. } => format!("Failed after {attempts} attempts"),
            TaskRunState::Canceled { .. } => "Canceled".to_string(),
        }
    }
}

/// Everything the control surface reports about one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub name: String,
    pub enabled: bool,
    pub scheduled: bool,
    pub state: TaskRunState,
    pub summary: String,
    pub max_retries: u32,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}
