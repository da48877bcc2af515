use chrono::{DateTime, Duration, Utc};
use extract_core::RecurrenceSpec;

use crate::cron::CronExpression;
use crate::error::{Result, ScheduleError};

/// Compute the next UTC fire time for `spec`.
///
/// The result is always strictly after `now`. `Ok(None)` means the
/// recurrence is exhausted (past its end date, a one-off that already
/// fired, a cron with no remaining match). An invalid spec fails fast with
/// `InvalidSpec` rather than resolving to "never".
pub fn next_fire_time(
    spec: &RecurrenceSpec,
    last_fire_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match spec {
        RecurrenceSpec::Cron(fields) => {
            let expr = CronExpression::compile(fields)?;
            let after = last_fire_time.map_or(now, |last| last.max(now));
            Ok(expr.next_after(after))
        }

        RecurrenceSpec::Interval {
            unit,
            every,
            start_date,
            end_date,
        } => {
            if *every == 0 {
                return Err(ScheduleError::invalid(
                    "every",
                    "interval must be at least 1",
                ));
            }
            let step = unit.span(*every);

            let candidate = match last_fire_time {
                Some(last) => match last.checked_add_signed(step) {
                    Some(next) if next > now => Some(next),
                    // Missed fires are coalesced into the first grid point after now.
                    Some(_) => first_grid_point_after(last, step, now),
                    None => None,
                },
                None if *start_date >= now => Some(*start_date),
                None => first_grid_point_after(*start_date, step, now),
            };
            // A moved start date wins over the old grid.
            let Some(candidate) = candidate.map(|c| c.max(*start_date)) else {
                return Ok(None);
            };

            if candidate <= now || end_date.is_some_and(|end| candidate > end) {
                return Ok(None);
            }
            Ok(Some(candidate))
        }

        RecurrenceSpec::OneOff { fire_date } => {
            if last_fire_time.is_none() && *fire_date > now {
                Ok(Some(*fire_date))
            } else {
                Ok(None)
            }
        }
    }
}

/// Smallest `anchor + k * step` (k ≥ 1) strictly after `now`; `None` when
/// that instant is beyond the representable range.
fn first_grid_point_after(
    anchor: DateTime<Utc>,
    step: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let step_ms = step.num_milliseconds().max(1);
    let elapsed_ms = (now - anchor).num_milliseconds().max(0);
    let k = elapsed_ms / step_ms + 1;
    let offset = step_ms.checked_mul(k).and_then(Duration::try_milliseconds)?;
    anchor.checked_add_signed(offset)
}
