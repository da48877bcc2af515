use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use extract_core::config::DEFAULT_RECONCILE_INTERVAL_SECS;

use crate::coordinator::{Coordinator, FireOutcome};
use crate::error::{Result, RunError};

/// Periodic tick that polls the registry for due jobs and fires each one
/// on its own tokio task, so a slow run never delays the others. A slower
/// second timer reconciles cycles a failed append left open.
pub struct SchedulerEngine {
    coordinator: Arc<Coordinator>,
    tick_interval: Duration,
    reconcile_interval: Duration,
}

impl SchedulerEngine {
    pub fn new(coordinator: Arc<Coordinator>, tick_interval: Duration) -> Self {
        Self {
            coordinator,
            tick_interval,
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
        }
    }

    /// Override the reconcile period. Clamped to at least one second.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Load enabled tasks into the registry, then reconcile cycles a crash
    /// left open. Order matters: resumed retries need a registered job.
    pub async fn bootstrap(&self, now: DateTime<Utc>) -> Result<()> {
        self.coordinator.schedule_enabled(now)?;
        self.coordinator.recover(now).await?;
        Ok(())
    }

    /// Fire every job due at `now`, in due order. Tasks already running are
    /// skipped here; the coordinator's lock catches any that slip through.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<Result<FireOutcome>>> {
        let due = self.coordinator.registry().due_jobs(now);
        if !due.is_empty() {
            debug!(count = due.len(), "due jobs");
        }

        due.into_iter()
            .filter(|task_id| !self.coordinator.is_running(*task_id))
            .map(|task_id| {
                let coordinator = Arc::clone(&self.coordinator);
                tokio::spawn(async move {
                    let outcome = coordinator.fire_scheduled(task_id, now).await;
                    match &outcome {
                        Ok(FireOutcome::Duplicate) | Ok(FireOutcome::NotDue) => {}
                        Ok(outcome) => debug!(task_id = %task_id, ?outcome, "fire finished"),
                        Err(e @ RunError::Persistence(_)) => {
                            error!(task_id = %task_id, error = %e, "run cycle abandoned")
                        }
                        Err(e) => warn!(task_id = %task_id, error = %e, code = e.code(), "fire failed"),
                    }
                    outcome
                })
            })
            .collect()
    }

    /// Close or resume open cycles nobody is driving. Errors are logged;
    /// the next pass tries again.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> usize {
        match self.coordinator.recover(now).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, code = e.code(), "reconcile pass failed");
                0
            }
        }
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            reconcile_secs = self.reconcile_interval.as_secs(),
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut reconcile = tokio::time::interval(self.reconcile_interval);
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // bootstrap already reconciled; skip the immediate first tick
        reconcile.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Spawned runs outlive the tick; handles are not awaited.
                    drop(self.tick(Utc::now()));
                }
                _ = reconcile.tick() => {
                    self.reconcile(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
