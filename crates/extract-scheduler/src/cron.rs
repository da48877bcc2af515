//! Cron grammar and compiled expressions.
//!
//! Eight fields, most significant first:
//!
//! | Field     | Range      | Names                  |
//! |-----------|------------|------------------------|
//! | `year`    | 1970–2099  |                        |
//! | `month`   | 1–12       | `jan` … `dec`          |
//! | `week`    | 1–53       | (ISO week number)      |
//! | `day`     | 1–31       | `last`, `last fri`, `2nd mon` |
//! | `weekday` | 0–6        | `mon` … `sun` (0 = Monday) |
//! | `hour`    | 0–23       |                        |
//! | `minute`  | 0–59       |                        |
//! | `second`  | 0–59       |                        |
//!
//! Each field accepts `*`, `N`, `a-b`, `a/n`, `a-b/n`, `*/n` and
//! comma-separated lists of those.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use extract_core::CronFields;

use crate::error::{Result, ScheduleError};

const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Year,
    Month,
    Week,
    Day,
    Weekday,
    Hour,
    Minute,
    Second,
}

impl CronField {
    /// All fields in significance order.
    pub const ALL: [CronField; 8] = [
        CronField::Year,
        CronField::Month,
        CronField::Week,
        CronField::Day,
        CronField::Weekday,
        CronField::Hour,
        CronField::Minute,
        CronField::Second,
    ];

    /// Field name as it appears in `CronFields` and in `InvalidSpec` errors.
    pub fn name(self) -> &'static str {
        match self {
            CronField::Year => "year",
            CronField::Month => "month",
            CronField::Week => "week",
            CronField::Day => "day",
            CronField::Weekday => "weekday",
            CronField::Hour => "hour",
            CronField::Minute => "minute",
            CronField::Second => "second",
        }
    }

    fn label(self) -> &'static str {
        match self {
            CronField::Year => "Year",
            CronField::Month => "Month",
            CronField::Week => "Week",
            CronField::Day => "Day",
            CronField::Weekday => "Week Day",
            CronField::Hour => "Hour",
            CronField::Minute => "Minute",
            CronField::Second => "Second",
        }
    }

    /// Inclusive legal value range.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            CronField::Year => (1970, 2099),
            CronField::Month => (1, 12),
            CronField::Week => (1, 53),
            CronField::Day => (1, 31),
            CronField::Weekday => (0, 6),
            CronField::Hour => (0, 23),
            CronField::Minute => (0, 59),
            CronField::Second => (0, 59),
        }
    }

    /// Maximum number of comma-separated elements.
    fn list_limit(self) -> usize {
        match self {
            CronField::Year => 84,
            CronField::Month => 12,
            CronField::Week => 53,
            CronField::Day => 31,
            CronField::Weekday => 7,
            CronField::Hour => 24,
            CronField::Minute | CronField::Second => 60,
        }
    }

    /// Expression used when the field is unset and no less significant field is set.
    fn default_expr(self) -> &'static str {
        match self {
            CronField::Year | CronField::Week | CronField::Weekday => "*",
            CronField::Month | CronField::Day => "1",
            CronField::Hour | CronField::Minute | CronField::Second => "0",
        }
    }

    /// The raw, trimmed expression for this field, `None` when unset or blank.
    pub fn get(self, fields: &CronFields) -> Option<&str> {
        let raw = match self {
            CronField::Year => &fields.year,
            CronField::Month => &fields.month,
            CronField::Week => &fields.week,
            CronField::Day => &fields.day,
            CronField::Weekday => &fields.weekday,
            CronField::Hour => &fields.hour,
            CronField::Minute => &fields.minute,
            CronField::Second => &fields.second,
        };
        raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn invalid(self, reason: String) -> ScheduleError {
        ScheduleError::invalid(self.name(), reason)
    }
}

impl std::fmt::Display for CronField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Relative day-of-month tokens, resolved against the target month's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySpecial {
    /// `last`: the month's final day.
    Last,
    /// `last fri`: the final occurrence of a weekday in the month.
    LastWeekday(Weekday),
    /// `2nd mon`: the n-th occurrence (1–5) of a weekday in the month.
    NthWeekday(u32, Weekday),
}

impl DaySpecial {
    fn matches(self, date: NaiveDate) -> bool {
        match self {
            DaySpecial::Last => date.day() == last_day_of_month(date),
            DaySpecial::LastWeekday(w) => {
                date.weekday() == w && date.day() + 7 > last_day_of_month(date)
            }
            DaySpecial::NthWeekday(n, w) => date.weekday() == w && (date.day() - 1) / 7 + 1 == n,
        }
    }
}

/// One parsed field: the set of matching values plus, for `day`, any
/// relative tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSpec {
    values: BTreeSet<u32>,
    specials: Vec<DaySpecial>,
    wildcard: bool,
}

impl FieldSpec {
    /// True when the expression contained a bare `*`.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    fn first_at_or_after(&self, value: u32) -> Option<u32> {
        self.values.range(value..).next().copied()
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        self.wildcard
            || self.values.contains(&date.day())
            || self.specials.iter().any(|s| s.matches(date))
    }
}

/// Parse a single field expression.
pub fn parse_field(field: CronField, expr: &str) -> Result<FieldSpec> {
    let expr = expr.trim().to_ascii_lowercase();
    let (min, max) = field.bounds();

    let items: Vec<&str> = expr.split(',').map(str::trim).collect();
    if items.len() > field.list_limit() {
        return Err(field.invalid(format!(
            "({}) Exceeded maximum number({}) of specified value. '{}' is provided",
            field.label(),
            field.list_limit(),
            items.len()
        )));
    }

    let mut spec = FieldSpec::default();
    for item in items {
        if item.is_empty() {
            return Err(illegal(field, &expr));
        }
        if item == "*" {
            spec.wildcard = true;
            spec.values.extend(min..=max);
            continue;
        }
        if field == CronField::Day {
            if let Some(special) = parse_day_special(item)? {
                spec.specials.push(special);
                continue;
            }
        }

        let (range_part, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(field, step)?)),
            None => (item, None),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a = parse_value(field, a)?;
            let b = parse_value(field, b)?;
            if a > b {
                return Err(field.invalid(format!(
                    "({}) Invalid range '{}'. Accepted range is {min}-{max}",
                    field.label(),
                    range_part
                )));
            }
            (a, b)
        } else {
            let a = parse_value(field, range_part)?;
            // `a/n` runs from `a` to the top of the range
            (a, if step.is_some() { max } else { a })
        };

        let step = step.unwrap_or(1) as usize;
        spec.values.extend((lo..=hi).step_by(step));
    }
    Ok(spec)
}

fn illegal(field: CronField, expr: &str) -> ScheduleError {
    field.invalid(format!(
        "({}) Illegal Expression Format '{}'",
        field.label(),
        expr
    ))
}

fn parse_value(field: CronField, token: &str) -> Result<u32> {
    let token = token.trim();
    let (min, max) = field.bounds();

    let value = if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        token.parse::<u32>().map_err(|_| illegal(field, token))?
    } else {
        match field {
            CronField::Month => name_index(&MONTH_NAMES, token)
                .map(|i| i + 1)
                .ok_or_else(|| field.invalid(format!("Invalid Month value '{token}'")))?,
            CronField::Weekday => name_index(&WEEKDAY_NAMES, token)
                .ok_or_else(|| field.invalid(format!("Invalid value '{token}'")))?,
            _ => return Err(illegal(field, token)),
        }
    };

    if value < min || value > max {
        return Err(field.invalid(format!(
            "{} values must be between {min} and {max} but '{token}' is provided",
            field.label()
        )));
    }
    Ok(value)
}

fn parse_step(field: CronField, token: &str) -> Result<u32> {
    let (_, max) = field.bounds();
    let step: u32 = token
        .trim()
        .parse()
        .map_err(|_| illegal(field, token))?;
    if step == 0 || step > max {
        return Err(field.invalid(format!(
            "({}) Accepted increment value range is 1~{max} but '{token}' is provided",
            field.label()
        )));
    }
    Ok(step)
}

/// `last`, `last <dow>`, `<n>st|nd|rd|th <dow>`; `Ok(None)` for anything else.
fn parse_day_special(item: &str) -> Result<Option<DaySpecial>> {
    if item == "last" {
        return Ok(Some(DaySpecial::Last));
    }

    let mut parts = item.split_whitespace();
    let (Some(head), Some(dow), None) = (parts.next(), parts.next(), parts.next()) else {
        return Ok(None);
    };

    let invalid = || CronField::Day.invalid(format!("(Day) Invalid value '{item}'"));
    let weekday = || weekday_from_name(dow).ok_or_else(invalid);

    if head == "last" {
        return Ok(Some(DaySpecial::LastWeekday(weekday()?)));
    }

    let ordinal = ["st", "nd", "rd", "th"]
        .iter()
        .find_map(|suffix| head.strip_suffix(suffix))
        .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    let Some(n) = ordinal else {
        return Ok(None);
    };
    let n: u32 = n.parse().map_err(|_| invalid())?;
    if !(1..=5).contains(&n) {
        return Err(CronField::Day.invalid(format!(
            "Day values must be between 1 and 5 but '{n}' is provided"
        )));
    }
    Ok(Some(DaySpecial::NthWeekday(n, weekday()?)))
}

fn name_index(names: &[&str], token: &str) -> Option<u32> {
    names.iter().position(|n| *n == token).map(|i| i as u32)
}

fn weekday_from_name(token: &str) -> Option<Weekday> {
    name_index(&WEEKDAY_NAMES, token).and_then(weekday_from_index)
}

fn weekday_from_index(i: u32) -> Option<Weekday> {
    match i {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// A fully parsed cron specification, ready to produce fire times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    year: FieldSpec,
    month: FieldSpec,
    week: FieldSpec,
    day: FieldSpec,
    weekday: FieldSpec,
    hour: FieldSpec,
    minute: FieldSpec,
    second: FieldSpec,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl CronExpression {
    /// Parse every field, filling unset ones.
    ///
    /// Unset fields more significant than the least significant set field
    /// become `*`; the rest take their minimum. `week` and `weekday` are
    /// always `*` when unset.
    pub fn compile(fields: &CronFields) -> Result<Self> {
        if let (Some(start), Some(end)) = (fields.start_date, fields.end_date) {
            if start > end {
                return Err(ScheduleError::invalid(
                    "window",
                    format!("start date {start} is after end date {end}"),
                ));
            }
        }

        let last_set = CronField::ALL
            .iter()
            .rposition(|f| f.get(fields).is_some());

        let mut parsed = Vec::with_capacity(CronField::ALL.len());
        for (i, field) in CronField::ALL.iter().enumerate() {
            let expr = match field.get(fields) {
                Some(expr) => expr,
                None if last_set.is_some_and(|last| i < last) => "*",
                None => field.default_expr(),
            };
            parsed.push(parse_field(*field, expr)?);
        }

        let mut it = parsed.into_iter();
        let mut next = || it.next().unwrap_or_default();
        Ok(Self {
            year: next(),
            month: next(),
            week: next(),
            day: next(),
            weekday: next(),
            hour: next(),
            minute: next(),
            second: next(),
            start: fields.start_date,
            end: fields.end_date,
        })
    }

    /// Whether `date` satisfies the date-level fields.
    ///
    /// Day-of-month and day-of-week are not combined: when `weekday` is `*`
    /// the `day` field decides, otherwise `weekday` does.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        let Ok(year) = u32::try_from(date.year()) else {
            return false;
        };
        if !self.year.contains(year) || !self.month.contains(date.month()) {
            return false;
        }
        if !self.week.is_wildcard() && !self.week.contains(date.iso_week().week()) {
            return false;
        }
        if self.weekday.is_wildcard() {
            self.day.matches_day(date)
        } else {
            self.weekday.contains(date.weekday().num_days_from_monday())
        }
    }

    /// Earliest matching instant strictly after `after`, within the window.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_second(after) + Duration::seconds(1);
        if let Some(start) = self.start {
            let start = ceil_to_second(start);
            if start > candidate {
                candidate = start;
            }
        }

        let midnight = NaiveTime::MIN;
        let mut date = candidate.date_naive();
        let mut floor = candidate.time();
        let (_, max_year) = CronField::Year.bounds();

        while date.year() <= max_year as i32 {
            if self.end.is_some_and(|end| date > end.date_naive()) {
                return None;
            }

            let year = u32::try_from(date.year()).unwrap_or(0);
            if !self.year.contains(year) {
                let next_year = self.year.first_at_or_after(year + 1)?;
                date = NaiveDate::from_ymd_opt(next_year as i32, 1, 1)?;
                floor = midnight;
                continue;
            }

            if !self.month.contains(date.month()) {
                date = match self.month.first_at_or_after(date.month() + 1) {
                    Some(m) => NaiveDate::from_ymd_opt(date.year(), m, 1)?,
                    None => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?,
                };
                floor = midnight;
                continue;
            }

            if self.matches_date(date) {
                if let Some(time) = self.first_time_at_or_after(floor) {
                    let fire = date.and_time(time).and_utc();
                    if self.end.is_some_and(|end| fire > end) {
                        return None;
                    }
                    return Some(fire);
                }
            }

            date = date.succ_opt()?;
            floor = midnight;
        }
        None
    }

    fn first_time_at_or_after(&self, floor: NaiveTime) -> Option<NaiveTime> {
        let (h0, m0, s0) = (floor.hour(), floor.minute(), floor.second());
        for &h in self.hour.values.range(h0..) {
            let m_from = if h == h0 { m0 } else { 0 };
            for &m in self.minute.values.range(m_from..) {
                let s_from = if h == h0 && m == m0 { s0 } else { 0 };
                if let Some(s) = self.second.first_at_or_after(s_from) {
                    return NaiveTime::from_hms_opt(h, m, s);
                }
            }
        }
        None
    }
}

fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}

fn ceil_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    let floor = truncate_to_second(t);
    if floor == t {
        t
    } else {
        floor + Duration::seconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn fields(pairs: &[(CronField, &str)]) -> CronFields {
        let mut f = CronFields::default();
        for (field, expr) in pairs {
            let slot = match field {
                CronField::Year => &mut f.year,
                CronField::Month => &mut f.month,
                CronField::Week => &mut f.week,
                CronField::Day => &mut f.day,
                CronField::Weekday => &mut f.weekday,
                CronField::Hour => &mut f.hour,
                CronField::Minute => &mut f.minute,
                CronField::Second => &mut f.second,
            };
            *slot = Some(expr.to_string());
        }
        f
    }

    #[test]
    fn parses_lists_ranges_and_steps() {
        let spec = parse_field(CronField::Minute, "0-10/5,30,45").unwrap();
        let values: Vec<u32> = spec.values.iter().copied().collect();
        assert_eq!(values, vec![0, 5, 10, 30, 45]);

        let spec = parse_field(CronField::Hour, "*/6").unwrap();
        assert!(!spec.is_wildcard());
        assert_eq!(spec.values.len(), 4);

        let spec = parse_field(CronField::Second, "50/5").unwrap();
        let values: Vec<u32> = spec.values.iter().copied().collect();
        assert_eq!(values, vec![50, 55]);
    }

    #[test]
    fn parses_names_case_insensitively() {
        let spec = parse_field(CronField::Weekday, "MON-fri").unwrap();
        assert_eq!(spec.values.len(), 5);
        assert!(spec.contains(0) && spec.contains(4) && !spec.contains(5));

        let spec = parse_field(CronField::Month, "Jan,dec").unwrap();
        assert!(spec.contains(1) && spec.contains(12));
    }

    #[test]
    fn rejects_out_of_range_value_naming_the_field() {
        let err = parse_field(CronField::Hour, "24").unwrap_err();
        match err {
            ScheduleError::InvalidSpec { field, reason } => {
                assert_eq!(field, "hour");
                assert_eq!(reason, "Hour values must be between 0 and 23 but '24' is provided");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_reversed_range_and_zero_step() {
        assert!(parse_field(CronField::Minute, "30-10").is_err());
        assert!(parse_field(CronField::Minute, "*/0").is_err());
        assert!(parse_field(CronField::Weekday, "sun-mon").is_err());
    }

    #[test]
    fn rejects_garbage_and_overlong_lists() {
        assert!(parse_field(CronField::Hour, "noon").is_err());
        assert!(parse_field(CronField::Hour, "1,,2").is_err());
        let too_many = (0..8).map(|d| (d % 7).to_string()).collect::<Vec<_>>().join(",");
        assert!(parse_field(CronField::Weekday, &too_many).is_err());
    }

    #[test]
    fn parses_day_specials() {
        let spec = parse_field(CronField::Day, "last, 2nd mon, last fri, 15").unwrap();
        assert_eq!(
            spec.specials,
            vec![
                DaySpecial::Last,
                DaySpecial::NthWeekday(2, Weekday::Mon),
                DaySpecial::LastWeekday(Weekday::Fri),
            ]
        );
        assert!(spec.contains(15));

        assert!(parse_field(CronField::Day, "6th mon").is_err());
        assert!(parse_field(CronField::Day, "last xyz").is_err());
    }

    #[test]
    fn day_specials_follow_the_calendar() {
        let feb_leap = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert!(DaySpecial::Last.matches(feb_leap));
        assert!(!DaySpecial::Last.matches(NaiveDate::from_ymd_opt(2024, 2, 28).unwrap()));

        // last Friday of March 2024 is the 29th
        assert!(DaySpecial::LastWeekday(Weekday::Fri)
            .matches(NaiveDate::from_ymd_opt(2024, 3, 29).unwrap()));
        assert!(!DaySpecial::LastWeekday(Weekday::Fri)
            .matches(NaiveDate::from_ymd_opt(2024, 3, 22).unwrap()));

        // second Monday of January 2024 is the 8th
        assert!(DaySpecial::NthWeekday(2, Weekday::Mon)
            .matches(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()));
    }

    #[test]
    fn unset_fields_default_by_significance() {
        // only minute set: hour and above are `*`, second is 0
        let expr = CronExpression::compile(&fields(&[(CronField::Minute, "1")])).unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 10, 0, 0)), Some(at(2024, 1, 1, 10, 1, 0)));
        assert_eq!(expr.next_after(at(2024, 1, 1, 10, 1, 0)), Some(at(2024, 1, 1, 11, 1, 0)));
    }

    #[test]
    fn nothing_set_fires_yearly() {
        let expr = CronExpression::compile(&CronFields::default()).unwrap();
        assert_eq!(expr.next_after(at(2024, 3, 1, 0, 0, 0)), Some(at(2025, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn weekday_wins_over_day_of_month() {
        let expr = CronExpression::compile(&fields(&[
            (CronField::Day, "15"),
            (CronField::Weekday, "sat"),
            (CronField::Hour, "9"),
        ]))
        .unwrap();
        // 2024-01-01 is a Monday; the first Saturday is the 6th, not the 15th
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0, 0)), Some(at(2024, 1, 6, 9, 0, 0)));
    }

    #[test]
    fn skips_months_without_the_day() {
        let expr = CronExpression::compile(&fields(&[
            (CronField::Day, "31"),
            (CronField::Hour, "0"),
        ]))
        .unwrap();
        assert_eq!(expr.next_after(at(2024, 2, 1, 0, 0, 0)), Some(at(2024, 3, 31, 0, 0, 0)));
        assert_eq!(expr.next_after(at(2024, 3, 31, 0, 0, 0)), Some(at(2024, 5, 31, 0, 0, 0)));
    }

    #[test]
    fn last_day_resolves_per_month() {
        let expr = CronExpression::compile(&fields(&[
            (CronField::Day, "last"),
            (CronField::Hour, "23"),
        ]))
        .unwrap();
        assert_eq!(expr.next_after(at(2023, 2, 1, 0, 0, 0)), Some(at(2023, 2, 28, 23, 0, 0)));
        assert_eq!(expr.next_after(at(2024, 2, 1, 0, 0, 0)), Some(at(2024, 2, 29, 23, 0, 0)));
    }

    #[test]
    fn february_thirtieth_never_fires() {
        let expr = CronExpression::compile(&fields(&[
            (CronField::Month, "feb"),
            (CronField::Day, "30"),
        ]))
        .unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn iso_week_constrains_dates() {
        let expr = CronExpression::compile(&fields(&[
            (CronField::Week, "2"),
            (CronField::Weekday, "wed"),
            (CronField::Hour, "6"),
        ]))
        .unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0, 0)), Some(at(2024, 1, 10, 6, 0, 0)));
    }

    #[test]
    fn window_bounds_the_search() {
        let mut f = fields(&[(CronField::Hour, "12")]);
        f.start_date = Some(at(2024, 6, 1, 0, 0, 0));
        f.end_date = Some(at(2024, 6, 2, 11, 0, 0));
        let expr = CronExpression::compile(&f).unwrap();

        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0, 0)), Some(at(2024, 6, 1, 12, 0, 0)));
        assert_eq!(expr.next_after(at(2024, 6, 1, 12, 0, 0)), None);
    }

    #[test]
    fn reversed_window_is_rejected() {
        let mut f = CronFields::default();
        f.start_date = Some(at(2024, 6, 2, 0, 0, 0));
        f.end_date = Some(at(2024, 6, 1, 0, 0, 0));
        let err = CronExpression::compile(&f).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidSpec { ref field, .. } if field == "window"));
    }

    #[test]
    fn year_exhaustion_returns_none() {
        let expr = CronExpression::compile(&fields(&[
            (CronField::Year, "2024"),
            (CronField::Hour, "0"),
        ]))
        .unwrap();
        assert_eq!(expr.next_after(at(2024, 12, 31, 0, 0, 0)), None);
    }
}
