use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Defines when a task (or a project, as a default for its tasks) fires.
///
/// Stored as JSON in the `recurrence` column of `tasks` and `projects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceSpec {
    /// Eight-field cron expression, optionally bounded by a live window.
    Cron(CronFields),

    /// Fire every `every` units, starting at `start_date`.
    Interval {
        unit: IntervalUnit,
        every: u32,
        start_date: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<DateTime<Utc>>,
    },

    /// Fire exactly once.
    OneOff { fire_date: DateTime<Utc> },
}

impl RecurrenceSpec {
    /// Short variant label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RecurrenceSpec::Cron(_) => "cron",
            RecurrenceSpec::Interval { .. } => "interval",
            RecurrenceSpec::OneOff { .. } => "one_off",
        }
    }
}

/// Cron sub-expressions, one per field. `None` (or an empty string) means
/// "not set"; unset fields are defaulted when the expression is compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronFields {
    pub year: Option<String>,
    pub month: Option<String>,
    /// ISO week number.
    pub week: Option<String>,
    /// Day of month, including `last`, `last <dow>` and `<n>th <dow>`.
    pub day: Option<String>,
    /// Day of week, 0 = Monday.
    pub weekday: Option<String>,
    pub hour: Option<String>,
    pub minute: Option<String>,
    pub second: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl IntervalUnit {
    /// Length of `every` units.
    pub fn span(self, every: u32) -> Duration {
        let n = i64::from(every);
        match self {
            IntervalUnit::Week => Duration::weeks(n),
            IntervalUnit::Day => Duration::days(n),
            IntervalUnit::Hour => Duration::hours(n),
            IntervalUnit::Minute => Duration::minutes(n),
            IntervalUnit::Second => Duration::seconds(n),
        }
    }
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntervalUnit::Week => "week",
            IntervalUnit::Day => "day",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Second => "second",
        };
        write!(f, "{s}")
    }
}
