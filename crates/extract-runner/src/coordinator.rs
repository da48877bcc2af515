//! Execution coordinator: drives one task's run cycle from trigger to
//! terminal record.
//!
//! Every transition appends exactly one audit record, and the order is
//! always lock → runner → audit append → registry update → unlock. A crash
//! or a failed append anywhere in between leaves an open cycle in the audit
//! log, which [`Coordinator::recover`] closes or resumes at startup and on
//! every reconcile pass of the engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use extract_core::{
    ExtractConfig, JobId, NewAuditRecord, RecordId, RecurrenceSpec, StatusKind, Task, TaskId,
};
use extract_scheduler::{Claim, JobRegistry, PendingRetry, TaskStore};
use tracing::{debug, error, info, warn};

use crate::attempts::{is_exhausted, AttemptTracker};
use crate::audit::{AuditStore, HistoryPage, HistoryQuery};
use crate::error::{Result, RunError};
use crate::retry::RetryPolicy;
use crate::runner::{RunStatus, TaskRunner};
use crate::state::{TaskRunState, TaskStatus};

const MAX_APPEND_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Wall-clock budget for one runner call; exceeding it is a failed attempt.
    pub run_timeout: Duration,
    pub retry: RetryPolicy,
    /// Tries per audit append before the cycle is abandoned.
    pub append_attempts: u32,
    pub append_backoff: Duration,
}

impl CoordinatorConfig {
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self {
            run_timeout: Duration::from_secs(config.scheduler.run_timeout_secs),
            retry: RetryPolicy::from_config(&config.retry),
            append_attempts: config.persistence.append_attempts,
            append_backoff: Duration::from_millis(config.persistence.append_backoff_ms),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_config(&ExtractConfig::default())
    }
}

/// How a trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// Nothing was due for the task.
    NotDue,
    /// Another run of the task held the execution lock.
    Duplicate,
    Succeeded { job_id: JobId, attempts: u32 },
    /// The attempt failed and attempt `next_attempt` is parked until `at`.
    RetryScheduled {
        job_id: JobId,
        next_attempt: u32,
        at: DateTime<Utc>,
    },
    Failed { job_id: JobId, attempts: u32 },
    Canceled { job_id: JobId },
}

/// Holds the per-task execution lock; released on drop.
struct RunLock<'a> {
    running: &'a DashMap<TaskId, Option<JobId>>,
    task_id: TaskId,
}

impl RunLock<'_> {
    fn assign(&self, job_id: &JobId) {
        if let Some(mut slot) = self.running.get_mut(&self.task_id) {
            *slot = Some(job_id.clone());
        }
    }
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.task_id);
    }
}

pub struct Coordinator {
    registry: Arc<JobRegistry>,
    tasks: Arc<TaskStore>,
    attempts: Arc<dyn AttemptTracker>,
    audit: Arc<dyn AuditStore>,
    runner: Arc<dyn TaskRunner>,
    config: CoordinatorConfig,
    /// Tasks holding the execution lock, with the cycle once it is known.
    running: DashMap<TaskId, Option<JobId>>,
    /// Cancel requests waiting for the in-flight attempt to return.
    cancel_requested: DashSet<TaskId>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<JobRegistry>,
        tasks: Arc<TaskStore>,
        attempts: Arc<dyn AttemptTracker>,
        audit: Arc<dyn AuditStore>,
        runner: Arc<dyn TaskRunner>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            tasks,
            attempts,
            audit,
            runner,
            config,
            running: DashMap::new(),
            cancel_requested: DashSet::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.running.contains_key(&task_id)
    }

    // ----- triggers ------------------------------------------------------

    /// Fire whatever the registry says is due for `task_id` at `now`: a
    /// natural occurrence starts a new cycle, a pending retry continues one.
    pub async fn fire_scheduled(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<FireOutcome> {
        // Lock before claiming so a rejected trigger does not consume the fire.
        let lock = match self.lock(task_id) {
            Ok(lock) => lock,
            Err(RunError::DuplicateTrigger { .. }) => {
                warn!(task_id = %task_id, "scheduled trigger skipped, task already running");
                return Ok(FireOutcome::Duplicate);
            }
            Err(e) => return Err(e),
        };

        match self.registry.claim(task_id, now) {
            None => Ok(FireOutcome::NotDue),
            Some(Claim::Scheduled { fire_time }) => {
                info!(task_id = %task_id, %fire_time, "scheduled fire");
                let opened = match self.load_task(task_id) {
                    Ok(task) => match self.open_cycle(&lock, &task).await {
                        Ok(job_id) => Ok((task, job_id)),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                };
                let (task, job_id) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        // Nothing durable exists for this fire yet: hand the claim back.
                        self.registry.reschedule(task_id, Some(fire_time));
                        self.store_next_run(task_id, Some(fire_time));
                        warn!(task_id = %task_id, %fire_time, error = %e, "scheduled fire released");
                        return Err(e);
                    }
                };
                let outcome = self.run_attempt(&task, job_id).await;
                if outcome.is_err() {
                    // The open cycle is left to reconciliation; the schedule moves on.
                    self.finish_cycle(task_id);
                }
                outcome
            }
            Some(Claim::Retry(retry)) => {
                let task = self.load_task(task_id)?;
                self.continue_cycle(&lock, &task, retry).await
            }
        }
    }

    /// Start a new cycle immediately, superseding any pending retry.
    pub async fn run_now(&self, task_id: TaskId) -> Result<FireOutcome> {
        let task = self.load_task(task_id)?;
        let lock = match self.lock(task_id) {
            Ok(lock) => lock,
            Err(RunError::DuplicateTrigger { .. }) => {
                warn!(task_id = %task_id, "manual run skipped, task already running");
                return Ok(FireOutcome::Duplicate);
            }
            Err(e) => return Err(e),
        };

        self.persist(NewAuditRecord::info(task_id, "Task manually run.")).await?;
        if let Some(retry) = self.registry.take_retry(task_id) {
            self.persist(NewAuditRecord::cycle(
                task_id,
                &retry.job_id,
                StatusKind::Canceled,
                "Superseded by a manual run.",
            ))
            .await?;
        }
        let job_id = self.open_cycle(&lock, &task).await?;
        self.run_attempt(&task, job_id).await
    }

    // ----- control surface ---------------------------------------------

    /// Register (or re-register) the task with its effective recurrence.
    /// Returns the next fire time; `None` means the recurrence is exhausted.
    pub async fn add_job(&self, task_id: TaskId) -> Result<Option<DateTime<Utc>>> {
        let task = self.load_task(task_id)?;
        let spec = self.tasks.effective_spec(&task)?;
        let _lock = self.try_lock(task_id);

        let next = self.register(task_id, spec, "Superseded by a reschedule.").await?;
        self.persist(NewAuditRecord::info(task_id, "Task scheduled.")).await?;
        info!(task_id = %task_id, next = ?next, "job added");
        Ok(next)
    }

    /// Drop the task from the registry. An in-flight attempt is left to
    /// finish. Returns whether a job was registered.
    pub async fn remove_job(&self, task_id: TaskId) -> Result<bool> {
        let _lock = self.try_lock(task_id);
        self.close_pending_retry(task_id, "Task unscheduled.").await?;
        let removed = self.registry.remove(task_id).is_some();
        self.store_next_run(task_id, None);
        if removed {
            self.persist(NewAuditRecord::info(task_id, "Task unscheduled.")).await?;
            info!(task_id = %task_id, "job removed");
        }
        Ok(removed)
    }

    /// End the task's retry loop.
    ///
    /// A parked retry is closed with a `Canceled` record on the spot. If an
    /// attempt is in flight the request is remembered and honoured when the
    /// attempt returns a failure. Either way the job is re-registered (or
    /// removed, when disabled) so no stale retry fires later.
    pub async fn cancel_retry(&self, task_id: TaskId) -> Result<()> {
        let task = self.load_task(task_id)?;
        let lock = self.try_lock(task_id);

        self.attempts.clear(task_id)?;
        match self.registry.take_retry(task_id) {
            Some(retry) => {
                self.persist(NewAuditRecord::cycle(
                    task_id,
                    &retry.job_id,
                    StatusKind::Canceled,
                    "Retry canceled.",
                ))
                .await?;
                info!(task_id = %task_id, job_id = %retry.job_id, "pending retry canceled");
            }
            None if lock.is_none() => {
                self.cancel_requested.insert(task_id);
                info!(task_id = %task_id, "cancel requested for in-flight attempt");
            }
            None => debug!(task_id = %task_id, "no retry to cancel"),
        }

        self.reschedule_pass(&task).await?;
        self.persist(NewAuditRecord::info(task_id, "Task retry canceled.")).await?;
        Ok(())
    }

    pub async fn enable_task(&self, task_id: TaskId) -> Result<Option<DateTime<Utc>>> {
        self.tasks.set_enabled(task_id, true)?;
        self.persist(NewAuditRecord::info(task_id, "Task enabled.")).await?;
        self.add_job(task_id).await
    }

    pub async fn disable_task(&self, task_id: TaskId) -> Result<()> {
        self.tasks.set_enabled(task_id, false)?;
        self.remove_job(task_id).await?;
        self.persist(NewAuditRecord::info(task_id, "Task disabled.")).await?;
        Ok(())
    }

    /// Copy the task's configuration into a new, disabled task.
    pub async fn duplicate_task(&self, task_id: TaskId) -> Result<Task> {
        let copy = self.tasks.duplicate_task(task_id)?;
        self.persist(NewAuditRecord::info(
            copy.id,
            format!("Task duplicated from task {task_id}."),
        ))
        .await?;
        Ok(copy)
    }

    /// Remove the job, the task row and its whole audit history.
    pub async fn delete_task(&self, task_id: TaskId) -> Result<()> {
        self.registry.remove(task_id);
        self.cancel_requested.remove(&task_id);
        self.attempts.clear(task_id)?;
        self.tasks.delete_task(task_id)?;
        let removed = self.audit.delete_task(task_id)?;
        info!(task_id = %task_id, records = removed, "task deleted");
        Ok(())
    }

    /// Force the task back to idle.
    ///
    /// Any open cycle (parked retry or a cycle stranded by a failed append)
    /// is closed with one `Canceled` record, the attempt count is dropped
    /// and the natural schedule is restored. Refused while an attempt is in
    /// flight. Returns whether a cycle was closed.
    pub async fn reset_task(&self, task_id: TaskId) -> Result<bool> {
        self.load_task(task_id)?;
        let _lock = self.lock(task_id)?;

        let mut open: Vec<JobId> = self
            .registry
            .take_retry(task_id)
            .map(|retry| retry.job_id)
            .into_iter()
            .collect();
        if let Some(job_id) = self.audit.latest_job(task_id)? {
            let state = TaskRunState::from_cycle(&self.audit.cycle(&job_id)?);
            if state.is_open() && !open.contains(&job_id) {
                open.push(job_id);
            }
        }
        for job_id in &open {
            self.persist(NewAuditRecord::cycle(
                task_id,
                job_id,
                StatusKind::Canceled,
                "Task status reset.",
            ))
            .await?;
        }

        self.attempts.clear(task_id)?;
        self.finish_cycle(task_id);
        self.persist(NewAuditRecord::info(task_id, "Task status reset.")).await?;
        info!(task_id = %task_id, closed = open.len(), "task status reset");
        Ok(!open.is_empty())
    }

    pub fn task_status(&self, task_id: TaskId) -> Result<TaskStatus> {
        let task = self.load_task(task_id)?;
        let state = match self.audit.latest_job(task_id)? {
            Some(job_id) => TaskRunState::from_cycle(&self.audit.cycle(&job_id)?),
            None => TaskRunState::Idle,
        };
        let job = self.registry.get(task_id);
        Ok(TaskStatus {
            task_id,
            name: task.name,
            enabled: task.enabled,
            scheduled: job.is_some(),
            summary: state.describe(task.max_retries),
            state,
            max_retries: task.max_retries,
            next_run: job.and_then(|j| j.due_at()).or(task.next_run),
            last_run: task.last_run,
        })
    }

    pub fn history(&self, task_id: TaskId, query: &HistoryQuery) -> Result<HistoryPage> {
        self.audit.history(task_id, query)
    }

    // ----- startup -------------------------------------------------------

    /// Register every enabled task. Tasks whose recurrence cannot be
    /// resolved are skipped with a warning. Returns the number registered.
    pub fn schedule_enabled(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut scheduled = 0;
        for task in self.tasks.list_enabled()? {
            let spec = match self.tasks.effective_spec(&task) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "task not scheduled");
                    continue;
                }
            };
            match self.registry.add(task.id, spec, now) {
                Ok(registration) => {
                    if let Some(retry) = registration.displaced_retry {
                        self.registry.schedule_retry(task.id, retry);
                    }
                    self.store_next_run(task.id, registration.next_fire_time);
                    scheduled += 1;
                }
                Err(e) => warn!(task_id = %task.id, error = %e, "task not scheduled"),
            }
        }
        info!(count = scheduled, "enabled tasks scheduled");
        Ok(scheduled)
    }

    /// Close or resume cycles left open by a crash or a failed append.
    ///
    /// Runs at startup and periodically afterwards. A cycle is only touched
    /// under the task's run lock, when it is still open and no retry of it
    /// is parked. An attempt that was in flight counts as failed. The cycle
    /// then retries immediately if it has budget left and the task is
    /// scheduled, otherwise it ends `Failed`. Returns the number of cycles
    /// reconciled.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<usize> {
        let open = self.audit.open_runs()?;
        let mut reconciled = 0;

        for run in open {
            let _lock = match self.lock(run.task_id) {
                Ok(lock) => lock,
                Err(RunError::DuplicateTrigger { .. }) => continue,
                Err(e) => return Err(e),
            };
            let job_id = run.job_id;
            if !TaskRunState::from_cycle(&self.audit.cycle(&job_id)?).is_open() {
                continue;
            }
            let parked = self
                .registry
                .get(run.task_id)
                .and_then(|job| job.retry)
                .is_some_and(|retry| retry.job_id == job_id);
            if parked {
                continue;
            }

            let Some(task) = self.tasks.get_task(run.task_id)? else {
                self.persist(NewAuditRecord::cycle(
                    run.task_id,
                    &job_id,
                    StatusKind::Failed,
                    "Task no longer exists.",
                ))
                .await?;
                reconciled += 1;
                continue;
            };

            if run.last_status == StatusKind::Running {
                self.persist(
                    NewAuditRecord::cycle(
                        task.id,
                        &job_id,
                        StatusKind::AttemptFailed,
                        "Attempt interrupted before its outcome was recorded.",
                    )
                    .with_attempt(run.attempts),
                )
                .await?;
            }
            self.attempts.restore(task.id, run.attempts)?;

            let retry = PendingRetry {
                job_id: job_id.clone(),
                attempts: run.attempts,
                at: now,
            };
            if !is_exhausted(run.attempts, task.max_retries)
                && self.registry.schedule_retry(task.id, retry)
            {
                warn!(task_id = %task.id, job_id = %job_id, attempts = run.attempts, "interrupted cycle resumed");
            } else {
                let message = if is_exhausted(run.attempts, task.max_retries) {
                    RunError::RetriesExhausted {
                        task_id: task.id.0,
                        attempts: run.attempts,
                    }
                    .to_string()
                } else {
                    "Run interrupted; task is not scheduled.".to_string()
                };
                self.persist(
                    NewAuditRecord::cycle(task.id, &job_id, StatusKind::Failed, message)
                        .with_attempt(run.attempts),
                )
                .await?;
                self.attempts.clear(task.id)?;
                warn!(task_id = %task.id, job_id = %job_id, "interrupted cycle closed as failed");
            }
            reconciled += 1;
        }

        if reconciled > 0 {
            info!(count = reconciled, "open run cycles reconciled");
        }
        Ok(reconciled)
    }

    // ----- cycle internals ----------------------------------------------

    fn lock(&self, task_id: TaskId) -> Result<RunLock<'_>> {
        match self.running.entry(task_id) {
            Entry::Occupied(_) => Err(RunError::DuplicateTrigger { task_id: task_id.0 }),
            Entry::Vacant(slot) => {
                slot.insert(None);
                Ok(RunLock {
                    running: &self.running,
                    task_id,
                })
            }
        }
    }

    /// Take the run lock if it is free. Control calls that only touch parked
    /// state hold it when they can, so a reconcile pass never sees their
    /// half-done work.
    fn try_lock(&self, task_id: TaskId) -> Option<RunLock<'_>> {
        self.lock(task_id).ok()
    }

    /// Start a new cycle: fresh job id, cleared counters, `Started` record.
    async fn open_cycle(&self, lock: &RunLock<'_>, task: &Task) -> Result<JobId> {
        let job_id = JobId::new();
        lock.assign(&job_id);
        self.cancel_requested.remove(&task.id);
        self.attempts.clear(task.id)?;

        self.persist(NewAuditRecord::cycle(
            task.id,
            &job_id,
            StatusKind::Started,
            "Task queued.",
        ))
        .await?;
        if let Err(e) = self.tasks.record_run(task.id, &job_id, Utc::now()) {
            warn!(task_id = %task.id, error = %e, "could not stamp last run");
        }
        info!(task_id = %task.id, job_id = %job_id, "run cycle started");
        Ok(job_id)
    }

    async fn continue_cycle(
        &self,
        lock: &RunLock<'_>,
        task: &Task,
        retry: PendingRetry,
    ) -> Result<FireOutcome> {
        lock.assign(&retry.job_id);

        if self.cancel_requested.remove(&task.id).is_some() {
            return self.cancel_cycle(task.id, retry.job_id).await;
        }
        if self.attempts.get(task.id)? < retry.attempts {
            self.attempts.restore(task.id, retry.attempts)?;
        }
        self.run_attempt(task, retry.job_id).await
    }

    async fn run_attempt(&self, task: &Task, job_id: JobId) -> Result<FireOutcome> {
        let attempt = self.attempts.get(task.id)? + 1;
        let total = task.max_retries + 1;

        // Persisted before the increment: a lost record must not cost budget.
        self.persist(
            NewAuditRecord::cycle(
                task.id,
                &job_id,
                StatusKind::Running,
                format!("Attempt {attempt} of {total}."),
            )
            .with_attempt(attempt),
        )
        .await?;
        let attempt = self.attempts.increment(task.id)?;
        debug!(task_id = %task.id, job_id = %job_id, attempt, runner = self.runner.name(), "attempt running");

        let outcome =
            tokio::time::timeout(self.config.run_timeout, self.runner.execute(task.id, &job_id)).await;
        let failure = match outcome {
            Ok(Ok(report)) if report.status == RunStatus::Success => None,
            Ok(Ok(report)) if report.message.is_empty() => {
                Some("runner reported failure".to_string())
            }
            Ok(Ok(report)) => Some(report.message),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "timed out after {}s",
                self.config.run_timeout.as_secs_f64()
            )),
        };

        match failure {
            None => {
                self.persist(
                    NewAuditRecord::cycle(task.id, &job_id, StatusKind::Succeeded, "Task succeeded.")
                        .with_attempt(attempt),
                )
                .await?;
                self.attempts.clear(task.id)?;
                self.finish_cycle(task.id);
                info!(task_id = %task.id, job_id = %job_id, attempt, "run cycle succeeded");
                Ok(FireOutcome::Succeeded {
                    job_id,
                    attempts: attempt,
                })
            }
            Some(message) => self.handle_failure(task, job_id, attempt, message).await,
        }
    }

    async fn handle_failure(
        &self,
        task: &Task,
        job_id: JobId,
        attempt: u32,
        message: String,
    ) -> Result<FireOutcome> {
        let failure = RunError::RunnerFailure(message);
        warn!(task_id = %task.id, job_id = %job_id, attempt, error = %failure, "attempt failed");
        self.persist(
            NewAuditRecord::cycle(task.id, &job_id, StatusKind::AttemptFailed, failure.to_string())
                .with_attempt(attempt),
        )
        .await?;

        if self.cancel_requested.remove(&task.id).is_some() {
            return self.cancel_cycle(task.id, job_id).await;
        }

        let message = if is_exhausted(attempt, task.max_retries) {
            RunError::RetriesExhausted {
                task_id: task.id.0,
                attempts: attempt,
            }
            .to_string()
        } else {
            let at = Utc::now() + self.config.retry.delay(attempt);
            let retry = PendingRetry {
                job_id: job_id.clone(),
                attempts: attempt,
                at,
            };
            if self.registry.schedule_retry(task.id, retry) {
                info!(task_id = %task.id, job_id = %job_id, next_attempt = attempt + 1, %at, "retry scheduled");
                return Ok(FireOutcome::RetryScheduled {
                    job_id,
                    next_attempt: attempt + 1,
                    at,
                });
            }
            format!("Task {} failed after {attempt} attempts; it is not scheduled, so no retry.", task.id)
        };

        self.persist(
            NewAuditRecord::cycle(task.id, &job_id, StatusKind::Failed, message)
                .with_attempt(attempt),
        )
        .await?;
        self.attempts.clear(task.id)?;
        self.finish_cycle(task.id);
        warn!(task_id = %task.id, job_id = %job_id, attempts = attempt, "run cycle failed");
        Ok(FireOutcome::Failed {
            job_id,
            attempts: attempt,
        })
    }

    async fn cancel_cycle(&self, task_id: TaskId, job_id: JobId) -> Result<FireOutcome> {
        self.attempts.clear(task_id)?;
        self.persist(NewAuditRecord::cycle(
            task_id,
            &job_id,
            StatusKind::Canceled,
            "Retry canceled.",
        ))
        .await?;
        self.finish_cycle(task_id);
        info!(task_id = %task_id, job_id = %job_id, "run cycle canceled");
        Ok(FireOutcome::Canceled { job_id })
    }

    /// Registry update after a terminal record: the natural schedule moves
    /// on whether the cycle succeeded or not.
    fn finish_cycle(&self, task_id: TaskId) {
        self.cancel_requested.remove(&task_id);
        match self.registry.advance(task_id, Utc::now()) {
            Ok(Some(job)) => {
                self.store_next_run(task_id, job.next_fire_time);
                debug!(task_id = %task_id, next = ?job.next_fire_time, "job advanced");
            }
            Ok(None) => debug!(task_id = %task_id, "task not scheduled, nothing to advance"),
            Err(e) => error!(task_id = %task_id, error = %e, "could not compute next fire time"),
        }
    }

    /// Re-register the task from its stored configuration, or drop it when
    /// disabled. A retry parked in the meantime is closed first.
    async fn reschedule_pass(&self, task: &Task) -> Result<()> {
        self.close_pending_retry(task.id, "Retry canceled.").await?;
        if !task.enabled {
            self.registry.remove(task.id);
            self.store_next_run(task.id, None);
            return Ok(());
        }
        let spec = self.tasks.effective_spec(task)?;
        self.register(task.id, spec, "Retry canceled.").await?;
        Ok(())
    }

    /// Add or replace the job. A retry the replacement displaced is closed
    /// with `message`.
    async fn register(
        &self,
        task_id: TaskId,
        spec: RecurrenceSpec,
        message: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let registration = self.registry.add(task_id, spec, Utc::now())?;
        self.store_next_run(task_id, registration.next_fire_time);
        if let Some(retry) = registration.displaced_retry {
            self.close_retry(task_id, retry, message).await?;
        }
        Ok(registration.next_fire_time)
    }

    async fn close_pending_retry(&self, task_id: TaskId, message: &str) -> Result<()> {
        match self.registry.take_retry(task_id) {
            Some(retry) => self.close_retry(task_id, retry, message).await,
            None => Ok(()),
        }
    }

    async fn close_retry(&self, task_id: TaskId, retry: PendingRetry, message: &str) -> Result<()> {
        self.attempts.clear(task_id)?;
        self.cancel_requested.remove(&task_id);
        self.persist(NewAuditRecord::cycle(
            task_id,
            &retry.job_id,
            StatusKind::Canceled,
            message,
        ))
        .await?;
        debug!(task_id = %task_id, job_id = %retry.job_id, "pending retry closed");
        Ok(())
    }

    fn store_next_run(&self, task_id: TaskId, next: Option<DateTime<Utc>>) {
        if let Err(e) = self.tasks.set_next_run(task_id, next) {
            debug!(task_id = %task_id, error = %e, "next run not stored");
        }
    }

    fn load_task(&self, task_id: TaskId) -> Result<Task> {
        self.tasks
            .get_task(task_id)?
            .ok_or(RunError::TaskNotFound { id: task_id.0 })
    }

    /// Append with bounded, doubling backoff. Fails with `Persistence` when
    /// the record cannot be made durable; the caller must stop the cycle.
    async fn persist(&self, record: NewAuditRecord) -> Result<RecordId> {
        let tries = self.config.append_attempts.max(1);
        let mut backoff = self.config.append_backoff;
        let mut attempt = 1;
        loop {
            match self.audit.append(&record) {
                Ok(id) => return Ok(id),
                Err(e) if attempt < tries => {
                    warn!(task_id = %record.task_id, attempt, error = %e, "audit append failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_APPEND_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    error!(task_id = %record.task_id, status = %record.status, error = %e, "audit append abandoned");
                    return Err(RunError::Persistence(e.to_string()));
                }
            }
        }
    }
}
