//! `extract-runner`: run-cycle execution for scheduled extract tasks.
//!
//! The [`engine::SchedulerEngine`] ticks, asks the job registry what is due
//! and hands each due task to the [`coordinator::Coordinator`], which owns
//! the per-task lock, the attempt counters, the retry loop and the audit
//! trail.
//!
//! # Cycle records
//!
//! | Record          | When                                           |
//! |-----------------|------------------------------------------------|
//! | `started`       | a trigger was accepted; opens the cycle        |
//! | `running`       | an attempt was handed to the runner            |
//! | `attempt_failed`| the attempt failed or timed out (error flag)   |
//! | `succeeded`     | terminal                                       |
//! | `failed`        | terminal, retries used up or not retryable     |
//! | `canceled`      | terminal, retry loop ended by an operator      |

pub mod attempts;
pub mod audit;
pub mod coordinator;
pub mod db;
pub mod engine;
pub mod error;
pub mod retry;
pub mod runner;
pub mod state;

pub use attempts::{AttemptTracker, MemoryAttemptTracker, RunAttempt, SqliteAttemptTracker};
pub use audit::{AuditStore, HistoryPage, HistoryQuery, HistorySort, OpenRun, SortOrder, SqliteAuditLog};
pub use coordinator::{Coordinator, CoordinatorConfig, FireOutcome};
pub use engine::SchedulerEngine;
pub use error::{Result, RunError};
pub use retry::RetryPolicy;
pub use runner::{HttpTaskRunner, RunReport, RunStatus, TaskRunner};
pub use state::{TaskRunState, TaskStatus};
