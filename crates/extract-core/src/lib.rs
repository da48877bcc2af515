//! `extract-core`: configuration, ids and domain types shared by the
//! scheduler, the execution coordinator and the gateway binary.

pub mod audit;
pub mod config;
pub mod error;
pub mod recurrence;
pub mod types;

pub use audit::{AuditRecord, NewAuditRecord, RecordId, StatusKind};
pub use config::ExtractConfig;
pub use error::{CoreError, Result};
pub use recurrence::{CronFields, IntervalUnit, RecurrenceSpec};
pub use types::{JobId, NewProject, NewTask, Project, ProjectId, Task, TaskId};
