//! Audit record types: written by the execution coordinator, read by the
//! derived run-state machine and the history endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JobId, TaskId};

/// Row id assigned by the audit log on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

/// What a single audit record says happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Operator or system note not tied to a run cycle.
    Info,
    /// A run cycle was accepted and queued. Always the first record of a job id.
    Started,
    /// An attempt was handed to the external runner.
    Running,
    /// An attempt failed; the cycle may still retry.
    AttemptFailed,
    Succeeded,
    /// The cycle failed for good.
    Failed,
    Canceled,
}

impl StatusKind {
    /// Terminal records close a run cycle; exactly one per job id.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusKind::Succeeded | StatusKind::Failed | StatusKind::Canceled
        )
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusKind::Info => "info",
            StatusKind::Started => "started",
            StatusKind::Running => "running",
            StatusKind::AttemptFailed => "attempt_failed",
            StatusKind::Succeeded => "succeeded",
            StatusKind::Failed => "failed",
            StatusKind::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StatusKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "info" => Ok(StatusKind::Info),
            "started" => Ok(StatusKind::Started),
            "running" => Ok(StatusKind::Running),
            "attempt_failed" => Ok(StatusKind::AttemptFailed),
            "succeeded" => Ok(StatusKind::Succeeded),
            "failed" => Ok(StatusKind::Failed),
            "canceled" => Ok(StatusKind::Canceled),
            other => Err(format!("unknown status kind: {other}")),
        }
    }
}

/// A persisted, immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: RecordId,
    pub task_id: TaskId,
    /// Run correlation id; `None` for `Info` records outside a cycle.
    pub job_id: Option<JobId>,
    pub status: StatusKind,
    /// Attempt number within the cycle, for attempt-scoped records.
    pub attempt: Option<u32>,
    pub message: String,
    pub error: bool,
    pub timestamp: DateTime<Utc>,
}

/// A record waiting to be appended. The log assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub task_id: TaskId,
    pub job_id: Option<JobId>,
    pub status: StatusKind,
    pub attempt: Option<u32>,
    pub message: String,
    pub error: bool,
}

impl NewAuditRecord {
    pub fn info(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            job_id: None,
            status: StatusKind::Info,
            attempt: None,
            message: message.into(),
            error: false,
        }
    }

    /// A record belonging to run cycle `job_id`.
    pub fn cycle(
        task_id: TaskId,
        job_id: &JobId,
        status: StatusKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            job_id: Some(job_id.clone()),
            status,
            attempt: None,
            message: message.into(),
            error: status == StatusKind::AttemptFailed,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_kind_roundtrip() {
        for kind in [
            StatusKind::Info,
            StatusKind::Started,
            StatusKind::Running,
            StatusKind::AttemptFailed,
            StatusKind::Succeeded,
            StatusKind::Failed,
            StatusKind::Canceled,
        ] {
            assert_eq!(kind.to_string().parse::<StatusKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<StatusKind>().is_err());
    }

    #[test]
    fn only_closing_kinds_are_terminal() {
        assert!(StatusKind::Succeeded.is_terminal());
        assert!(StatusKind::Failed.is_terminal());
        assert!(StatusKind::Canceled.is_terminal());
        assert!(!StatusKind::AttemptFailed.is_terminal());
        assert!(!StatusKind::Started.is_terminal());
    }

    #[test]
    fn attempt_failures_carry_the_error_flag() {
        let job = JobId::new();
        let rec = NewAuditRecord::cycle(TaskId(1), &job, StatusKind::AttemptFailed, "boom");
        assert!(rec.error);
        let rec = NewAuditRecord::cycle(TaskId(1), &job, StatusKind::Failed, "done");
        assert!(!rec.error);
    }
}
