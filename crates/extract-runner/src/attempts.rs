use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use extract_core::TaskId;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::Result;

/// Attempt bookkeeping for the open run cycle of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunAttempt {
    pub attempt_count: u32,
    pub last_attempt_at: DateTime<Utc>,
}

/// Per-task attempt counters.
///
/// The tracker only counts; the coordinator decides when a cycle has used
/// its budget (see [`is_exhausted`]). `increment` is atomic per task, so a
/// retry racing a cancel never loses or duplicates an increment.
pub trait AttemptTracker: Send + Sync {
    /// Record one more attempt and return the new count.
    fn increment(&self, task_id: TaskId) -> Result<u32>;

    fn snapshot(&self, task_id: TaskId) -> Result<Option<RunAttempt>>;

    /// Current count, 0 when no cycle is open.
    fn get(&self, task_id: TaskId) -> Result<u32> {
        Ok(self.snapshot(task_id)?.map_or(0, |a| a.attempt_count))
    }

    fn clear(&self, task_id: TaskId) -> Result<()>;

    /// Overwrite the count, used when recovering a cycle from the audit log.
    fn restore(&self, task_id: TaskId, attempt_count: u32) -> Result<()>;
}

/// True once `attempt_count` attempts have used up `max_retries` retries.
/// A cycle makes at most `max_retries + 1` attempts.
pub fn is_exhausted(attempt_count: u32, max_retries: u32) -> bool {
    attempt_count > max_retries
}

/// Process-local tracker. Counts are lost on restart, which only costs the
/// interrupted cycle a fresh start.
#[derive(Debug, Default)]
pub struct MemoryAttemptTracker {
    attempts: DashMap<TaskId, RunAttempt>,
}

impl MemoryAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptTracker for MemoryAttemptTracker {
    fn increment(&self, task_id: TaskId) -> Result<u32> {
        let now = Utc::now();
        let entry = self
            .attempts
            .entry(task_id)
            .and_modify(|a| {
                a.attempt_count += 1;
                a.last_attempt_at = now;
            })
            .or_insert(RunAttempt {
                attempt_count: 1,
                last_attempt_at: now,
            });
        Ok(entry.attempt_count)
    }

    fn snapshot(&self, task_id: TaskId) -> Result<Option<RunAttempt>> {
        Ok(self.attempts.get(&task_id).map(|a| *a))
    }

    fn clear(&self, task_id: TaskId) -> Result<()> {
        self.attempts.remove(&task_id);
        Ok(())
    }

    fn restore(&self, task_id: TaskId, attempt_count: u32) -> Result<()> {
        self.attempts.insert(
            task_id,
            RunAttempt {
                attempt_count,
                last_attempt_at: Utc::now(),
            },
        );
        Ok(())
    }
}

/// Tracker backed by the `run_attempts` table, so every process sharing the
/// database file sees the same counters.
pub struct SqliteAttemptTracker {
    db: Mutex<Connection>,
}

impl SqliteAttemptTracker {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }
}

impl AttemptTracker for SqliteAttemptTracker {
    fn increment(&self, task_id: TaskId) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let count = db.query_row(
            "INSERT INTO run_attempts (task_id, attempt_count, last_attempt_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT (task_id) DO UPDATE
                 SET attempt_count = attempt_count + 1,
                     last_attempt_at = excluded.last_attempt_at
             RETURNING attempt_count",
            params![task_id.0, Utc::now()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn snapshot(&self, task_id: TaskId) -> Result<Option<RunAttempt>> {
        let db = self.db.lock().unwrap();
        let attempt = db
            .query_row(
                "SELECT attempt_count, last_attempt_at FROM run_attempts WHERE task_id = ?1",
                params![task_id.0],
                |row| {
                    Ok(RunAttempt {
                        attempt_count: row.get(0)?,
                        last_attempt_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(attempt)
    }

    fn clear(&self, task_id: TaskId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM run_attempts WHERE task_id = ?1", params![task_id.0])?;
        Ok(())
    }

    fn restore(&self, task_id: TaskId, attempt_count: u32) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO run_attempts (task_id, attempt_count, last_attempt_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (task_id) DO UPDATE
                 SET attempt_count = excluded.attempt_count,
                     last_attempt_at = excluded.last_attempt_at",
            params![task_id.0, attempt_count, Utc::now()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn sqlite() -> SqliteAttemptTracker {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SqliteAttemptTracker::new(conn)
    }

    fn exercise(tracker: &dyn AttemptTracker) {
        let id = TaskId(1);
        assert_eq!(tracker.get(id).unwrap(), 0);
        assert_eq!(tracker.increment(id).unwrap(), 1);
        assert_eq!(tracker.increment(id).unwrap(), 2);
        assert_eq!(tracker.get(id).unwrap(), 2);
        assert_eq!(tracker.get(TaskId(2)).unwrap(), 0);

        tracker.clear(id).unwrap();
        assert_eq!(tracker.get(id).unwrap(), 0);
        assert!(tracker.snapshot(id).unwrap().is_none());
        tracker.clear(id).unwrap();

        tracker.restore(id, 3).unwrap();
        assert_eq!(tracker.increment(id).unwrap(), 4);
    }

    #[test]
    fn memory_tracker_counts() {
        exercise(&MemoryAttemptTracker::new());
    }

    #[test]
    fn sqlite_tracker_counts() {
        exercise(&sqlite());
    }

    #[test]
    fn increment_past_the_ceiling_reports_true_count() {
        let tracker = MemoryAttemptTracker::new();
        for _ in 0..5 {
            tracker.increment(TaskId(1)).unwrap();
        }
        assert_eq!(tracker.get(TaskId(1)).unwrap(), 5);
        assert!(is_exhausted(5, 2));
        assert!(is_exhausted(3, 2));
        assert!(!is_exhausted(2, 2));
        assert!(is_exhausted(1, 0));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let tracker = Arc::new(MemoryAttemptTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.increment(TaskId(7)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.get(TaskId(7)).unwrap(), 800);
    }
}
