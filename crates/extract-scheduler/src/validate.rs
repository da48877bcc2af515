use chrono::{DateTime, Utc};
use extract_core::{CronFields, RecurrenceSpec};

use crate::cron::{parse_field, CronExpression, CronField};
use crate::error::{Result, ScheduleError};

/// Check a recurrence spec before it is stored or handed to the registry.
///
/// Errors name the offending field. Nothing is silently clamped.
pub fn validate(spec: &RecurrenceSpec) -> Result<()> {
    match spec {
        RecurrenceSpec::Cron(fields) => validate_cron(fields),
        RecurrenceSpec::Interval {
            every,
            start_date,
            end_date,
            ..
        } => {
            if *every == 0 {
                return Err(ScheduleError::invalid(
                    "every",
                    "interval must be at least 1",
                ));
            }
            check_window(Some(*start_date), *end_date)
        }
        RecurrenceSpec::OneOff { .. } => Ok(()),
    }
}

/// Validate every set cron field independently, then the combined expression.
///
/// Per-field checks run first so that the first bad field is reported even
/// when defaulting would hide it behind another.
pub fn validate_cron(fields: &CronFields) -> Result<()> {
    for field in CronField::ALL {
        if let Some(expr) = field.get(fields) {
            parse_field(field, expr)?;
        }
    }
    check_window(fields.start_date, fields.end_date)?;
    CronExpression::compile(fields).map(|_| ())
}

/// Validate a single cron field expression, e.g. from a form input.
pub fn validate_field(field: CronField, expr: &str) -> Result<()> {
    parse_field(field, expr).map(|_| ())
}

fn check_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<()> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(ScheduleError::invalid(
            "window",
            format!("start date {start} is after end date {end}"),
        )),
        _ => Ok(()),
    }
}
