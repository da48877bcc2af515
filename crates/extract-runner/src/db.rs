use rusqlite::Connection;

use crate::error::Result;

/// Initialise the audit and attempt-counter schema in `conn`.
///
/// Idempotent. `audit_log` is append-only; rows are only ever removed by
/// the task-deletion cascade.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS audit_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id    INTEGER NOT NULL,
            job_id     TEXT,               -- NULL for info records
            status     TEXT    NOT NULL,
            attempt    INTEGER,
            message    TEXT    NOT NULL DEFAULT '',
            error      INTEGER NOT NULL DEFAULT 0,
            timestamp  TEXT    NOT NULL    -- fixed-width RFC 3339, microseconds
        );

        CREATE INDEX IF NOT EXISTS idx_audit_task   ON audit_log (task_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_job    ON audit_log (job_id);
        CREATE INDEX IF NOT EXISTS idx_audit_status ON audit_log (task_id, status);
        CREATE INDEX IF NOT EXISTS idx_audit_error  ON audit_log (task_id, error);

        -- Shared attempt counters for the sqlite tracker backend.
        CREATE TABLE IF NOT EXISTS run_attempts (
            task_id          INTEGER PRIMARY KEY,
            attempt_count    INTEGER NOT NULL,
            last_attempt_at  TEXT    NOT NULL
        );
        ",
    )?;
    Ok(())
}
