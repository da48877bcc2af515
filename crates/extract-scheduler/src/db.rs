use rusqlite::Connection;

use crate::error::Result;

/// Initialise the project/task schema in `conn`.
///
/// Idempotent. `recurrence` columns hold a JSON-encoded `RecurrenceSpec`
/// or NULL; a task with a NULL recurrence inherits its project's.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS projects (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            name         TEXT    NOT NULL,
            description  TEXT,
            recurrence   TEXT,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id       INTEGER REFERENCES projects (id) ON DELETE SET NULL,
            name             TEXT    NOT NULL,
            enabled          INTEGER NOT NULL DEFAULT 0,
            max_retries      INTEGER NOT NULL DEFAULT 0,
            recurrence       TEXT,
            last_run         TEXT,
            last_run_job_id  TEXT,
            next_run         TEXT,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        );

        -- Startup scheduling loads every enabled task.
        CREATE INDEX IF NOT EXISTS idx_tasks_enabled ON tasks (enabled);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('projects', 'tasks')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
