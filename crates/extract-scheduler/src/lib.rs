//! `extract-scheduler`: recurrence resolution, validation and the in-memory
//! job registry, plus the SQLite store for projects and tasks.
//!
//! # Recurrence variants
//!
//! | Variant    | Behaviour                                                  |
//! |------------|------------------------------------------------------------|
//! | `Cron`     | Eight-field cron with optional start/end window            |
//! | `Interval` | Every N weeks/days/hours/minutes/seconds from a start date |
//! | `OneOff`   | Single fire at an absolute UTC instant                     |
//!
//! [`schedule::next_fire_time`] is pure: the same spec, last fire and `now`
//! always give the same answer. The [`registry::JobRegistry`] owns the only
//! mutable scheduling state.

pub mod cron;
pub mod db;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod validate;

pub use cron::{CronExpression, CronField};
pub use error::{Result, ScheduleError};
pub use registry::{Claim, JobRegistry, PendingRetry, Registration, ScheduledJob};
pub use schedule::next_fire_time;
pub use store::TaskStore;
pub use validate::{validate, validate_cron, validate_field};
