use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use extract_core::{JobId, RecurrenceSpec, TaskId};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::schedule::next_fire_time;

/// A retry waiting for its delay to elapse. It belongs to an open run cycle
/// and is claimed ahead of the job's natural schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRetry {
    pub job_id: JobId,
    /// Attempts already made in the cycle.
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// In-memory record of one scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub task_id: TaskId,
    pub spec: RecurrenceSpec,
    /// `None` when the recurrence is exhausted or a fire is in flight.
    pub next_fire_time: Option<DateTime<Utc>>,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub retry: Option<PendingRetry>,
}

impl ScheduledJob {
    /// When the job next wants attention: a pending retry wins over the
    /// natural schedule.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match &self.retry {
            Some(retry) => Some(retry.at),
            None => self.next_fire_time,
        }
    }
}

/// What a successful [`JobRegistry::claim`] handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The natural schedule fired at `fire_time`.
    Scheduled { fire_time: DateTime<Utc> },
    /// A pending retry of an open cycle became due.
    Retry(PendingRetry),
}

/// Outcome of [`JobRegistry::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// `None` means the recurrence is exhausted.
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Retry that was parked on the replaced job. Its cycle is still open.
    pub displaced_retry: Option<PendingRetry>,
}

/// Map of task id to scheduled job. At most one entry per task.
///
/// All mutations go through the map's per-entry locks, so concurrent
/// control-surface calls and engine ticks never observe a half-updated job.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<TaskId, ScheduledJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the job for `task_id` and compute its next fire time.
    ///
    /// Replacing with the same spec keeps `last_fire_time` so an interval
    /// resumes on its grid; a changed spec starts from scratch. Any pending
    /// retry is dropped from the job and handed back in the result so the
    /// caller can close its cycle.
    pub fn add(
        &self,
        task_id: TaskId,
        spec: RecurrenceSpec,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        match self.jobs.entry(task_id) {
            Entry::Occupied(mut entry) => {
                let last = entry
                    .get()
                    .last_fire_time
                    .filter(|_| entry.get().spec == spec);
                let next = next_fire_time(&spec, last, now)?;
                let displaced_retry = entry.get_mut().retry.take();
                *entry.get_mut() = ScheduledJob {
                    task_id,
                    spec,
                    next_fire_time: next,
                    last_fire_time: last,
                    enabled: true,
                    retry: None,
                };
                debug!(task_id = %task_id, next = ?next, "job replaced");
                Ok(Registration {
                    next_fire_time: next,
                    displaced_retry,
                })
            }
            Entry::Vacant(entry) => {
                let next = next_fire_time(&spec, None, now)?;
                entry.insert(ScheduledJob {
                    task_id,
                    spec,
                    next_fire_time: next,
                    last_fire_time: None,
                    enabled: true,
                    retry: None,
                });
                debug!(task_id = %task_id, next = ?next, "job added");
                Ok(Registration {
                    next_fire_time: next,
                    displaced_retry: None,
                })
            }
        }
    }

    /// Remove the job. Removing an absent job is a no-op.
    pub fn remove(&self, task_id: TaskId) -> Option<ScheduledJob> {
        let removed = self.jobs.remove(&task_id).map(|(_, job)| job);
        if removed.is_some() {
            debug!(task_id = %task_id, "job removed");
        }
        removed
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.jobs.contains_key(&task_id)
    }

    pub fn get(&self, task_id: TaskId) -> Option<ScheduledJob> {
        self.jobs.get(&task_id).map(|job| job.clone())
    }

    /// Overwrite the next fire time. Only existing jobs are touched.
    pub fn reschedule(&self, task_id: TaskId, next: Option<DateTime<Utc>>) -> bool {
        match self.jobs.get_mut(&task_id) {
            Some(mut job) => {
                job.next_fire_time = next;
                true
            }
            None => false,
        }
    }

    /// Recompute the next fire time once a claimed natural fire has run.
    ///
    /// A job whose next fire is still pending (a manual run finished while
    /// the natural schedule was untouched) is left as it is. `Ok(None)` when
    /// the job is not registered; otherwise a snapshot of the job.
    pub fn advance(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Option<ScheduledJob>> {
        let Some(mut job) = self.jobs.get_mut(&task_id) else {
            return Ok(None);
        };
        if job.next_fire_time.is_none() {
            job.next_fire_time = next_fire_time(&job.spec, job.last_fire_time, now)?;
        }
        Ok(Some(job.clone()))
    }

    /// Park a retry on the job. Fails (returns `false`) if the job is gone.
    pub fn schedule_retry(&self, task_id: TaskId, retry: PendingRetry) -> bool {
        match self.jobs.get_mut(&task_id) {
            Some(mut job) => {
                job.retry = Some(retry);
                true
            }
            None => false,
        }
    }

    /// Remove and return the pending retry, if any.
    pub fn take_retry(&self, task_id: TaskId) -> Option<PendingRetry> {
        self.jobs.get_mut(&task_id).and_then(|mut job| job.retry.take())
    }

    /// Atomically claim the job if it is due at `now`.
    ///
    /// A natural claim moves `next_fire_time` into `last_fire_time` and
    /// leaves `next_fire_time` empty until the run cycle finishes and the
    /// job is advanced. Two concurrent claims never both succeed.
    pub fn claim(&self, task_id: TaskId, now: DateTime<Utc>) -> Option<Claim> {
        let mut job = self.jobs.get_mut(&task_id)?;
        if !job.enabled {
            return None;
        }
        if let Some(retry) = &job.retry {
            if retry.at > now {
                return None;
            }
            return job.retry.take().map(Claim::Retry);
        }
        match job.next_fire_time {
            Some(fire_time) if fire_time <= now => {
                job.last_fire_time = Some(fire_time);
                job.next_fire_time = None;
                Some(Claim::Scheduled { fire_time })
            }
            _ => None,
        }
    }

    /// Ids of every enabled job due at `now`, ordered by due time then id.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut due: Vec<(DateTime<Utc>, TaskId)> = self
            .jobs
            .iter()
            .filter(|job| job.enabled)
            .filter_map(|job| job.due_at().filter(|at| *at <= now).map(|at| (at, job.task_id)))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Every job, ordered by task id.
    pub fn snapshot(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.iter().map(|job| job.clone()).collect();
        jobs.sort_by_key(|job| job.task_id);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use extract_core::{CronFields, IntervalUnit};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn daily_at(hour: &str) -> RecurrenceSpec {
        RecurrenceSpec::Cron(CronFields {
            hour: Some(hour.into()),
            minute: Some("0".into()),
            ..Default::default()
        })
    }

    #[test]
    fn add_is_idempotent() {
        let reg = JobRegistry::new();
        let now = at(2024, 1, 1, 0, 0, 0);
        let a = reg.add(TaskId(1), daily_at("9"), now).unwrap();
        let b = reg.add(TaskId(1), daily_at("9"), now).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.displaced_retry, None);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(TaskId(1)).unwrap().next_fire_time, Some(at(2024, 1, 1, 9, 0, 0)));
    }

    #[test]
    fn remove_absent_is_a_no_op() {
        let reg = JobRegistry::new();
        assert!(reg.remove(TaskId(7)).is_none());
        reg.add(TaskId(7), daily_at("9"), at(2024, 1, 1, 0, 0, 0)).unwrap();
        assert!(reg.remove(TaskId(7)).is_some());
        assert!(reg.remove(TaskId(7)).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn invalid_spec_is_not_registered() {
        let reg = JobRegistry::new();
        let bad = RecurrenceSpec::Cron(CronFields {
            minute: Some("61".into()),
            ..Default::default()
        });
        assert!(reg.add(TaskId(1), bad, at(2024, 1, 1, 0, 0, 0)).is_err());
        assert!(!reg.contains(TaskId(1)));
    }

    #[test]
    fn reschedule_only_touches_existing_jobs() {
        let reg = JobRegistry::new();
        assert!(!reg.reschedule(TaskId(3), Some(at(2024, 1, 1, 0, 0, 0))));
        assert!(!reg.contains(TaskId(3)));
    }

    #[test]
    fn due_jobs_are_ordered_by_time_then_id() {
        let reg = JobRegistry::new();
        let now = at(2024, 1, 1, 0, 0, 0);
        reg.add(TaskId(3), daily_at("1"), now).unwrap();
        reg.add(TaskId(1), daily_at("2"), now).unwrap();
        reg.add(TaskId(2), daily_at("1"), now).unwrap();
        reg.add(TaskId(4), daily_at("5"), now).unwrap();

        let due = reg.due_jobs(at(2024, 1, 1, 3, 0, 0));
        assert_eq!(due, vec![TaskId(2), TaskId(3), TaskId(1)]);
    }

    #[test]
    fn claim_succeeds_once() {
        let reg = JobRegistry::new();
        reg.add(TaskId(1), daily_at("9"), at(2024, 1, 1, 0, 0, 0)).unwrap();
        let now = at(2024, 1, 1, 9, 0, 1);

        assert_eq!(
            reg.claim(TaskId(1), now),
            Some(Claim::Scheduled { fire_time: at(2024, 1, 1, 9, 0, 0) })
        );
        assert_eq!(reg.claim(TaskId(1), now), None);

        let job = reg.get(TaskId(1)).unwrap();
        assert_eq!(job.last_fire_time, Some(at(2024, 1, 1, 9, 0, 0)));
        assert_eq!(job.next_fire_time, None);

        let job = reg.advance(TaskId(1), now).unwrap().unwrap();
        assert_eq!(job.next_fire_time, Some(at(2024, 1, 2, 9, 0, 0)));
    }

    #[test]
    fn pending_retry_takes_precedence() {
        let reg = JobRegistry::new();
        reg.add(TaskId(1), daily_at("9"), at(2024, 1, 1, 0, 0, 0)).unwrap();
        let retry = PendingRetry {
            job_id: JobId::from("job-1"),
            attempts: 1,
            at: at(2024, 1, 1, 8, 0, 0),
        };
        assert!(reg.schedule_retry(TaskId(1), retry.clone()));

        assert_eq!(reg.claim(TaskId(1), at(2024, 1, 1, 7, 0, 0)), None);
        assert_eq!(reg.due_jobs(at(2024, 1, 1, 8, 0, 0)), vec![TaskId(1)]);
        assert_eq!(
            reg.claim(TaskId(1), at(2024, 1, 1, 8, 0, 0)),
            Some(Claim::Retry(retry))
        );
        // natural schedule untouched by the retry claim
        assert_eq!(reg.get(TaskId(1)).unwrap().next_fire_time, Some(at(2024, 1, 1, 9, 0, 0)));
    }

    #[test]
    fn retry_needs_a_registered_job() {
        let reg = JobRegistry::new();
        let retry = PendingRetry {
            job_id: JobId::new(),
            attempts: 1,
            at: at(2024, 1, 1, 0, 0, 0),
        };
        assert!(!reg.schedule_retry(TaskId(9), retry));
        assert!(reg.take_retry(TaskId(9)).is_none());
    }

    #[test]
    fn re_adding_keeps_interval_grid() {
        let reg = JobRegistry::new();
        let spec = RecurrenceSpec::Interval {
            unit: IntervalUnit::Week,
            every: 1,
            start_date: at(2024, 1, 1, 0, 0, 0),
            end_date: None,
        };
        reg.add(TaskId(1), spec.clone(), at(2023, 12, 1, 0, 0, 0)).unwrap();
        reg.claim(TaskId(1), at(2024, 1, 1, 0, 0, 0)).unwrap();

        let next = reg.add(TaskId(1), spec, at(2024, 1, 1, 0, 0, 5)).unwrap();
        assert_eq!(next.next_fire_time, Some(at(2024, 1, 8, 0, 0, 0)));
    }

    #[test]
    fn changed_spec_forgets_the_last_fire() {
        let reg = JobRegistry::new();
        let first = RecurrenceSpec::OneOff { fire_date: at(2024, 1, 1, 9, 0, 0) };
        reg.add(TaskId(1), first, at(2024, 1, 1, 0, 0, 0)).unwrap();
        reg.claim(TaskId(1), at(2024, 1, 1, 9, 0, 0)).unwrap();
        assert_eq!(reg.advance(TaskId(1), at(2024, 1, 1, 9, 0, 1)).unwrap().unwrap().next_fire_time, None);

        let moved = RecurrenceSpec::OneOff { fire_date: at(2024, 1, 2, 9, 0, 0) };
        let registered = reg.add(TaskId(1), moved, at(2024, 1, 1, 10, 0, 0)).unwrap();
        assert_eq!(registered.next_fire_time, Some(at(2024, 1, 2, 9, 0, 0)));
        assert_eq!(reg.get(TaskId(1)).unwrap().last_fire_time, None);
    }

    #[test]
    fn replacing_hands_back_the_pending_retry() {
        let reg = JobRegistry::new();
        let now = at(2024, 1, 1, 0, 0, 0);
        reg.add(TaskId(1), daily_at("9"), now).unwrap();
        let retry = PendingRetry {
            job_id: JobId::from("job-1"),
            attempts: 2,
            at: at(2024, 1, 1, 1, 0, 0),
        };
        reg.schedule_retry(TaskId(1), retry.clone());

        let registered = reg.add(TaskId(1), daily_at("10"), now).unwrap();
        assert_eq!(registered.displaced_retry, Some(retry));
        assert_eq!(reg.get(TaskId(1)).unwrap().retry, None);
    }
}
