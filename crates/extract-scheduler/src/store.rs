use std::sync::Mutex;

use chrono::{DateTime, Utc};
use extract_core::{JobId, NewProject, NewTask, Project, ProjectId, RecurrenceSpec, Task, TaskId};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::{Result, ScheduleError};
use crate::validate::validate;

const TASK_COLUMNS: &str = "id, project_id, name, enabled, max_retries, recurrence,
     last_run, last_run_job_id, next_run, created_at, updated_at";

/// SQLite-backed store for projects and tasks.
///
/// The scheduling core reads task configuration from here and writes back
/// the run bookkeeping columns (`last_run`, `last_run_job_id`, `next_run`).
pub struct TaskStore {
    db: Mutex<Connection>,
}

impl TaskStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    #[instrument(skip(self, project), fields(name = %project.name))]
    pub fn create_project(&self, project: &NewProject) -> Result<Project> {
        if let Some(spec) = &project.recurrence {
            validate(spec)?;
        }
        let recurrence = encode(project.recurrence.as_ref())?;
        let now = Utc::now();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO projects (name, description, recurrence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![project.name, project.description, recurrence, now],
        )?;
        let id = ProjectId(db.last_insert_rowid());
        debug!(project_id = %id, "project created");

        query_project(&db, id)?.ok_or(ScheduleError::ProjectNotFound { id: id.0 })
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let db = self.db.lock().unwrap();
        query_project(&db, id)
    }

    #[instrument(skip(self, task), fields(name = %task.name))]
    pub fn create_task(&self, task: &NewTask) -> Result<Task> {
        if let Some(spec) = &task.recurrence {
            validate(spec)?;
        }
        let recurrence = encode(task.recurrence.as_ref())?;
        let now = Utc::now();

        let db = self.db.lock().unwrap();
        if let Some(project_id) = task.project_id {
            if query_project(&db, project_id)?.is_none() {
                return Err(ScheduleError::ProjectNotFound { id: project_id.0 });
            }
        }
        db.execute(
            "INSERT INTO tasks (project_id, name, enabled, max_retries, recurrence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                task.project_id.map(|p| p.0),
                task.name,
                task.enabled,
                task.max_retries,
                recurrence,
                now
            ],
        )?;
        let id = TaskId(db.last_insert_rowid());
        debug!(task_id = %id, "task created");

        query_task(&db, id)?.ok_or(ScheduleError::TaskNotFound { id: id.0 })
    }

    /// Retrieve a task, returning `None` if it does not exist.
    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let db = self.db.lock().unwrap();
        query_task(&db, id)
    }

    /// Retrieve a task, failing with `TaskNotFound` if it does not exist.
    pub fn task(&self, id: TaskId) -> Result<Task> {
        self.get_task(id)?
            .ok_or(ScheduleError::TaskNotFound { id: id.0 })
    }

    /// Every enabled task, ordered by id.
    pub fn list_enabled(&self) -> Result<Vec<Task>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE enabled = 1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self))]
    pub fn set_enabled(&self, id: TaskId, enabled: bool) -> Result<()> {
        self.update(
            id,
            "UPDATE tasks SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Utc::now(), id.0],
        )
    }

    /// Replace the task's own recurrence. `None` falls back to the project's.
    #[instrument(skip(self, spec))]
    pub fn set_recurrence(&self, id: TaskId, spec: Option<&RecurrenceSpec>) -> Result<()> {
        if let Some(spec) = spec {
            validate(spec)?;
        }
        let recurrence = encode(spec)?;
        self.update(
            id,
            "UPDATE tasks SET recurrence = ?1, updated_at = ?2 WHERE id = ?3",
            params![recurrence, Utc::now(), id.0],
        )
    }

    /// The recurrence that governs `task`: its own, else its project's.
    pub fn effective_spec(&self, task: &Task) -> Result<RecurrenceSpec> {
        if let Some(spec) = &task.recurrence {
            return Ok(spec.clone());
        }
        let project = match task.project_id {
            Some(id) => self.get_project(id)?,
            None => None,
        };
        project
            .and_then(|p| p.recurrence)
            .ok_or_else(|| ScheduleError::invalid("recurrence", format!("task {} has no schedule", task.id)))
    }

    /// Stamp the start of a run cycle on the task row.
    pub fn record_run(&self, id: TaskId, job_id: &JobId, at: DateTime<Utc>) -> Result<()> {
        self.update(
            id,
            "UPDATE tasks SET last_run = ?1, last_run_job_id = ?2, updated_at = ?1 WHERE id = ?3",
            params![at, job_id.as_str(), id.0],
        )
    }

    pub fn set_next_run(&self, id: TaskId, next: Option<DateTime<Utc>>) -> Result<()> {
        self.update(
            id,
            "UPDATE tasks SET next_run = ?1, updated_at = ?2 WHERE id = ?3",
            params![next, Utc::now(), id.0],
        )
    }

    /// Copy a task. The copy starts disabled with empty run bookkeeping.
    #[instrument(skip(self))]
    pub fn duplicate_task(&self, id: TaskId) -> Result<Task> {
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "INSERT INTO tasks (project_id, name, enabled, max_retries, recurrence, created_at, updated_at)
             SELECT project_id, name || ' (Duplicated)', 0, max_retries, recurrence, ?1, ?1
             FROM tasks WHERE id = ?2",
            params![now, id.0],
        )?;
        if changed == 0 {
            return Err(ScheduleError::TaskNotFound { id: id.0 });
        }
        let copy = TaskId(db.last_insert_rowid());
        debug!(task_id = %id, copy_id = %copy, "task duplicated");
        query_task(&db, copy)?.ok_or(ScheduleError::TaskNotFound { id: copy.0 })
    }

    /// Permanently delete a task row. Audit history is owned by the audit
    /// log and must be cleaned up separately.
    #[instrument(skip(self))]
    pub fn delete_task(&self, id: TaskId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM tasks WHERE id = ?1", params![id.0])?;
        if changed == 0 {
            return Err(ScheduleError::TaskNotFound { id: id.0 });
        }
        Ok(())
    }

    fn update(&self, id: TaskId, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let db = self.db.lock().unwrap();
        if db.execute(sql, params)? == 0 {
            return Err(ScheduleError::TaskNotFound { id: id.0 });
        }
        Ok(())
    }
}

fn encode(spec: Option<&RecurrenceSpec>) -> Result<Option<String>> {
    Ok(spec.map(serde_json::to_string).transpose()?)
}

fn decode(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<RecurrenceSpec>> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn query_project(db: &Connection, id: ProjectId) -> Result<Option<Project>> {
    let project = db
        .query_row(
            "SELECT id, name, description, recurrence, created_at, updated_at
             FROM projects WHERE id = ?1",
            params![id.0],
            row_to_project,
        )
        .optional()?;
    Ok(project)
}

fn query_task(db: &Connection, id: TaskId) -> Result<Option<Task>> {
    let task = db
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id.0],
            row_to_task,
        )
        .optional()?;
    Ok(task)
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        recurrence: decode(3, row.get(3)?)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: TaskId(row.get(0)?),
        project_id: row.get::<_, Option<i64>>(1)?.map(ProjectId),
        name: row.get(2)?,
        enabled: row.get(3)?,
        max_retries: row.get(4)?,
        recurrence: decode(5, row.get(5)?)?,
        last_run: row.get(6)?,
        last_run_job_id: row.get::<_, Option<String>>(7)?.map(JobId::from),
        next_run: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use extract_core::{CronFields, IntervalUnit};

    fn store() -> TaskStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        TaskStore::new(conn)
    }

    fn hourly() -> RecurrenceSpec {
        RecurrenceSpec::Interval {
            unit: IntervalUnit::Hour,
            every: 1,
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_date: None,
        }
    }

    #[test]
    fn create_and_read_task() {
        let store = store();
        let task = store
            .create_task(&NewTask {
                name: "orders".into(),
                enabled: true,
                max_retries: 2,
                recurrence: Some(hourly()),
                ..Default::default()
            })
            .unwrap();
        let back = store.task(task.id).unwrap();
        assert_eq!(back.name, "orders");
        assert_eq!(back.max_retries, 2);
        assert_eq!(back.recurrence, Some(hourly()));
        assert!(back.enabled);
    }

    #[test]
    fn invalid_recurrence_is_rejected_on_create() {
        let store = store();
        let bad = RecurrenceSpec::Cron(CronFields {
            day: Some("32".into()),
            ..Default::default()
        });
        let err = store
            .create_task(&NewTask {
                name: "bad".into(),
                recurrence: Some(bad),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SPEC");
    }

    #[test]
    fn task_inherits_project_recurrence() {
        let store = store();
        let project = store
            .create_project(&NewProject {
                name: "warehouse".into(),
                recurrence: Some(hourly()),
                ..Default::default()
            })
            .unwrap();
        let task = store
            .create_task(&NewTask {
                project_id: Some(project.id),
                name: "stock".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.effective_spec(&task).unwrap(), hourly());

        let orphan = store
            .create_task(&NewTask {
                name: "orphan".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            store.effective_spec(&orphan),
            Err(ScheduleError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn unknown_project_is_rejected() {
        let store = store();
        let err = store
            .create_task(&NewTask {
                project_id: Some(ProjectId(99)),
                name: "x".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ScheduleError::ProjectNotFound { id: 99 }));
    }

    #[test]
    fn duplicate_starts_disabled_and_clean() {
        let store = store();
        let task = store
            .create_task(&NewTask {
                name: "orders".into(),
                enabled: true,
                max_retries: 3,
                recurrence: Some(hourly()),
                ..Default::default()
            })
            .unwrap();
        let now = Utc::now();
        store.record_run(task.id, &JobId::new(), now).unwrap();
        store.set_next_run(task.id, Some(now)).unwrap();

        let copy = store.duplicate_task(task.id).unwrap();
        assert_ne!(copy.id, task.id);
        assert_eq!(copy.name, "orders (Duplicated)");
        assert!(!copy.enabled);
        assert_eq!(copy.max_retries, 3);
        assert!(copy.last_run.is_none() && copy.next_run.is_none());
        assert!(copy.last_run_job_id.is_none());
    }

    #[test]
    fn list_enabled_filters_and_orders() {
        let store = store();
        for (name, enabled) in [("a", true), ("b", false), ("c", true)] {
            store
                .create_task(&NewTask {
                    name: name.into(),
                    enabled,
                    ..Default::default()
                })
                .unwrap();
        }
        let names: Vec<String> = store.list_enabled().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn updates_on_missing_task_report_not_found() {
        let store = store();
        assert!(matches!(
            store.set_enabled(TaskId(5), true),
            Err(ScheduleError::TaskNotFound { id: 5 })
        ));
        assert!(matches!(
            store.delete_task(TaskId(5)),
            Err(ScheduleError::TaskNotFound { id: 5 })
        ));
    }
}
