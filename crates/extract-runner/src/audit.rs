use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use extract_core::{AuditRecord, JobId, NewAuditRecord, RecordId, StatusKind, TaskId};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::Result;

const RECORD_COLUMNS: &str = "id, task_id, job_id, status, attempt, message, error, timestamp";
const MAX_PER_PAGE: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySort {
    #[default]
    StatusDate,
    Status,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter, paging and sort for a history read. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub sort: HistorySort,
    #[serde(default)]
    pub order: SortOrder,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            job_id: None,
            page: default_page(),
            per_page: default_per_page(),
            sort: HistorySort::default(),
            order: SortOrder::default(),
        }
    }
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    50
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub records: Vec<AuditRecord>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// A run cycle with a `Started` record and no terminal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenRun {
    pub task_id: TaskId,
    pub job_id: JobId,
    /// Attempts handed to the runner so far.
    pub attempts: u32,
    pub last_status: StatusKind,
}

/// Durable, append-only run history.
///
/// `append` is the durability checkpoint: once it returns `Ok`, the record
/// survives a restart.
pub trait AuditStore: Send + Sync {
    fn append(&self, record: &NewAuditRecord) -> Result<RecordId>;

    fn history(&self, task_id: TaskId, query: &HistoryQuery) -> Result<HistoryPage>;

    /// Every record of one cycle, oldest first.
    fn cycle(&self, job_id: &JobId) -> Result<Vec<AuditRecord>>;

    /// Job id of the task's most recent cycle.
    fn latest_job(&self, task_id: TaskId) -> Result<Option<JobId>>;

    /// Cycles with no terminal record, oldest first.
    fn open_runs(&self) -> Result<Vec<OpenRun>>;

    /// Task-deletion cascade. Returns the number of records removed.
    fn delete_task(&self, task_id: TaskId) -> Result<usize>;
}

/// SQLite implementation of [`AuditStore`].
///
/// Timestamps come from a monotonic clock seeded with the newest stored
/// record, so records of one cycle are strictly ordered even when the wall
/// clock stalls or steps back.
///
/// All appends from every task serialize on the one connection. Each holds
/// the mutex for a single-row insert and nothing else, so the critical
/// section stays short; runner calls and retry backoff happen outside it.
/// Deployments that outgrow this should put the log on its own database
/// file or a pooled backend behind the same [`AuditStore`] trait.
pub struct SqliteAuditLog {
    db: Mutex<Connection>,
    last_micros: AtomicI64,
}

impl SqliteAuditLog {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        let newest: Option<DateTime<Utc>> =
            conn.query_row("SELECT MAX(timestamp) FROM audit_log", [], |row| row.get(0))?;
        Ok(Self {
            db: Mutex::new(conn),
            last_micros: AtomicI64::new(newest.map_or(0, |t| t.timestamp_micros())),
        })
    }

    /// Next timestamp, strictly after every one handed out before.
    fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let prev = self
            .last_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let micros = now.max(prev + 1);
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }
}

impl AuditStore for SqliteAuditLog {
    #[instrument(skip(self, record), fields(task_id = %record.task_id, status = %record.status))]
    fn append(&self, record: &NewAuditRecord) -> Result<RecordId> {
        let db = self.db.lock().unwrap();
        // stamped under the lock so id order and timestamp order agree
        let timestamp = self.stamp().to_rfc3339_opts(SecondsFormat::Micros, false);
        db.execute(
            "INSERT INTO audit_log (task_id, job_id, status, attempt, message, error, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.task_id.0,
                record.job_id.as_ref().map(JobId::as_str),
                record.status.to_string(),
                record.attempt,
                record.message,
                record.error,
                timestamp
            ],
        )?;
        let id = RecordId(db.last_insert_rowid());
        debug!(record_id = id.0, "audit record appended");
        Ok(id)
    }

    fn history(&self, task_id: TaskId, query: &HistoryQuery) -> Result<HistoryPage> {
        let per_page = query.per_page.clamp(1, MAX_PER_PAGE);
        let page = query.page.max(1);
        let offset = i64::from(page - 1) * i64::from(per_page);
        let dir = query.order.sql();
        let order_by = match query.sort {
            HistorySort::StatusDate => format!("timestamp {dir}, id {dir}"),
            HistorySort::Status => format!("status {dir}, timestamp {dir}, id {dir}"),
            HistorySort::Error => format!("error {dir}, timestamp {dir}, id {dir}"),
        };
        let job_id = query.job_id.as_ref().map(JobId::as_str);

        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE task_id = ?1 AND (?2 IS NULL OR job_id = ?2)",
            params![task_id.0, job_id],
            |row| row.get(0),
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM audit_log
             WHERE task_id = ?1 AND (?2 IS NULL OR job_id = ?2)
             ORDER BY {order_by}
             LIMIT ?3 OFFSET ?4"
        ))?;
        let records = stmt
            .query_map(params![task_id.0, job_id, per_page, offset], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(HistoryPage {
            records,
            total: total.max(0) as u64,
            page,
            per_page,
        })
    }

    fn cycle(&self, job_id: &JobId) -> Result<Vec<AuditRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM audit_log WHERE job_id = ?1 ORDER BY timestamp, id"
        ))?;
        let records = stmt
            .query_map(params![job_id.as_str()], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn latest_job(&self, task_id: TaskId) -> Result<Option<JobId>> {
        let db = self.db.lock().unwrap();
        let job_id: Option<String> = db
            .query_row(
                "SELECT job_id FROM audit_log
                 WHERE task_id = ?1 AND job_id IS NOT NULL
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![task_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(job_id.map(JobId::from))
    }

    fn open_runs(&self) -> Result<Vec<OpenRun>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT s.task_id, s.job_id,
                    (SELECT COUNT(*) FROM audit_log r
                      WHERE r.job_id = s.job_id AND r.status = 'running'),
                    (SELECT l.status FROM audit_log l
                      WHERE l.job_id = s.job_id ORDER BY l.timestamp DESC, l.id DESC LIMIT 1)
             FROM audit_log s
             WHERE s.status = 'started'
               AND NOT EXISTS (SELECT 1 FROM audit_log t
                                WHERE t.job_id = s.job_id
                                  AND t.status IN ('succeeded', 'failed', 'canceled'))
             ORDER BY s.timestamp, s.id",
        )?;
        let runs = stmt
            .query_map([], |row| {
                Ok(OpenRun {
                    task_id: TaskId(row.get(0)?),
                    job_id: JobId::from(row.get::<_, String>(1)?),
                    attempts: row.get(2)?,
                    last_status: parse_status(3, row.get(3)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    #[instrument(skip(self))]
    fn delete_task(&self, task_id: TaskId) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let removed = db.execute("DELETE FROM audit_log WHERE task_id = ?1", params![task_id.0])?;
        debug!(removed, "audit history deleted");
        Ok(removed)
    }
}

fn parse_status(idx: usize, raw: String) -> rusqlite::Result<StatusKind> {
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRecord> {
    Ok(AuditRecord {
        id: RecordId(row.get(0)?),
        task_id: TaskId(row.get(1)?),
        job_id: row.get::<_, Option<String>>(2)?.map(JobId::from),
        status: parse_status(3, row.get(3)?)?,
        attempt: row.get(4)?,
        message: row.get(5)?,
        error: row.get(6)?,
        timestamp: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> SqliteAuditLog {
        SqliteAuditLog::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn run_cycle(log: &SqliteAuditLog, task: TaskId, terminal: StatusKind) -> JobId {
        let job = JobId::new();
        for (status, attempt) in [
            (StatusKind::Started, None),
            (StatusKind::Running, Some(1)),
            (StatusKind::AttemptFailed, Some(1)),
            (StatusKind::Running, Some(2)),
            (terminal, None),
        ] {
            let mut rec = NewAuditRecord::cycle(task, &job, status, status.to_string());
            rec.attempt = attempt;
            log.append(&rec).unwrap();
        }
        job
    }

    #[test]
    fn timestamps_strictly_increase() {
        let log = log();
        let job = run_cycle(&log, TaskId(1), StatusKind::Succeeded);
        let records = log.cycle(&job).unwrap();
        assert_eq!(records.len(), 5);
        for pair in records.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
            assert!(pair[0].id < pair[1].id);
        }
        assert_eq!(records[0].status, StatusKind::Started);
        assert_eq!(records.iter().filter(|r| r.status.is_terminal()).count(), 1);
    }

    #[test]
    fn concurrent_appends_stay_ordered() {
        let log = std::sync::Arc::new(log());
        let handles: Vec<_> = (1..=4)
            .map(|task| {
                let log = std::sync::Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        run_cycle(&log, TaskId(task), StatusKind::Succeeded);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut all = Vec::new();
        for task in 1..=4 {
            let query = HistoryQuery {
                per_page: MAX_PER_PAGE,
                order: SortOrder::Asc,
                ..Default::default()
            };
            let page = log.history(TaskId(task), &query).unwrap();
            assert_eq!(page.total, 125);
            all.extend(page.records);
        }
        all.sort_by_key(|r| r.id);
        for pair in all.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        assert!(log.open_runs().unwrap().is_empty());
    }

    #[test]
    fn history_pages_and_filters() {
        let log = log();
        let first = run_cycle(&log, TaskId(1), StatusKind::Failed);
        run_cycle(&log, TaskId(1), StatusKind::Succeeded);
        run_cycle(&log, TaskId(2), StatusKind::Succeeded);
        log.append(&NewAuditRecord::info(TaskId(1), "Task scheduled.")).unwrap();

        let page = log
            .history(TaskId(1), &HistoryQuery { per_page: 4, ..Default::default() })
            .unwrap();
        assert_eq!(page.total, 11);
        assert_eq!(page.records.len(), 4);
        assert_eq!(page.records[0].status, StatusKind::Info);
        assert!(page.records.iter().all(|r| r.task_id == TaskId(1)));

        let last = log
            .history(TaskId(1), &HistoryQuery { per_page: 4, page: 3, ..Default::default() })
            .unwrap();
        assert_eq!(last.records.len(), 3);

        let only_first = log
            .history(
                TaskId(1),
                &HistoryQuery {
                    job_id: Some(first.clone()),
                    order: SortOrder::Asc,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(only_first.total, 5);
        assert_eq!(only_first.records[0].status, StatusKind::Started);
        assert!(only_first.records.iter().all(|r| r.job_id.as_ref() == Some(&first)));
    }

    #[test]
    fn history_sorts_by_error_flag() {
        let log = log();
        run_cycle(&log, TaskId(1), StatusKind::Failed);
        let page = log
            .history(
                TaskId(1),
                &HistoryQuery { sort: HistorySort::Error, ..Default::default() },
            )
            .unwrap();
        assert!(page.records[0].error);
        assert!(!page.records[1].error);
    }

    #[test]
    fn open_runs_lists_unterminated_cycles() {
        let log = log();
        run_cycle(&log, TaskId(1), StatusKind::Succeeded);

        let open = JobId::new();
        log.append(&NewAuditRecord::cycle(TaskId(2), &open, StatusKind::Started, "queued"))
            .unwrap();
        log.append(
            &NewAuditRecord::cycle(TaskId(2), &open, StatusKind::Running, "running").with_attempt(1),
        )
        .unwrap();

        let runs = log.open_runs().unwrap();
        assert_eq!(
            runs,
            vec![OpenRun {
                task_id: TaskId(2),
                job_id: open.clone(),
                attempts: 1,
                last_status: StatusKind::Running,
            }]
        );
        assert_eq!(log.latest_job(TaskId(2)).unwrap(), Some(open));
    }

    #[test]
    fn delete_cascade_only_touches_one_task() {
        let log = log();
        run_cycle(&log, TaskId(1), StatusKind::Succeeded);
        run_cycle(&log, TaskId(2), StatusKind::Succeeded);
        assert_eq!(log.delete_task(TaskId(1)).unwrap(), 5);
        assert_eq!(log.history(TaskId(1), &HistoryQuery::default()).unwrap().total, 0);
        assert_eq!(log.history(TaskId(2), &HistoryQuery::default()).unwrap().total, 5);
        assert!(log.latest_job(TaskId(1)).unwrap().is_none());
    }

    #[test]
    fn clock_resumes_after_stored_records() {
        let dir = std::env::temp_dir().join(format!("extract-audit-{}.db", JobId::new()));
        let path = dir.to_str().unwrap().to_string();
        let newest = {
            let log = SqliteAuditLog::new(Connection::open(&path).unwrap()).unwrap();
            let job = run_cycle(&log, TaskId(1), StatusKind::Succeeded);
            log.cycle(&job).unwrap().last().unwrap().timestamp
        };
        let log = SqliteAuditLog::new(Connection::open(&path).unwrap()).unwrap();
        let id = log.append(&NewAuditRecord::info(TaskId(1), "after restart")).unwrap();
        let page = log.history(TaskId(1), &HistoryQuery::default()).unwrap();
        assert_eq!(page.records[0].id, id);
        assert!(page.records[0].timestamp > newest);
        let _ = std::fs::remove_file(&path);
    }
}
