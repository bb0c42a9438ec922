use aoc_core::job_contracts::{Job, JobStatus, NewJob, StatusStamp};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const JOBS_SCHEMA_VERSION: i64 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "
    id, type, title, description, status, priority, agent_id,
    created_at, updated_at, started_at, finished_at,
    result_summary, error_message, tags, session_key, fail_count,
    verifier_last_confidence, pr_number, pr_url, revision_count
";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("unexpected journal mode: {0}")]
    JournalMode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceRecord {
    pub job_id: String,
    pub confidence: f64,
    pub recorded_at: i64,
}

pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(StorageError::JournalMode(journal_mode));
        }
        conn.pragma_update(None, "foreign_keys", true)?;

        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > JOBS_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: JOBS_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_jobs.sql");
            self.conn.execute_batch(sql)?;
            self.conn.pragma_update(None, "user_version", 1)?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_job_confidence_history.sql");
            self.conn.execute_batch(sql)?;
            self.conn.pragma_update(None, "user_version", 2)?;
        }

        Ok(())
    }

    /// Inserts a job in the `pending` state. Status timestamps stay NULL
    /// until the first status update.
    pub fn insert_job(&self, job: &NewJob) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO jobs (
                id,
                type,
                title,
                description,
                status,
                priority,
                agent_id,
                created_at,
                tags
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                job.id,
                job.job_type,
                job.title,
                job.description,
                JobStatus::Pending.as_str(),
                job.priority,
                job.agent_id,
                job.created_at,
                job.tags,
            ],
        )?;
        Ok(())
    }

    pub fn job(&self, id: &str) -> Result<Option<Job>, StorageError> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = statement.query_map([limit as i64], job_from_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Applies a status stamp without checking the prior status. Returns the
    /// number of rows touched, which is zero when no job has this id.
    pub fn update_job_status(&self, id: &str, stamp: &StatusStamp) -> Result<usize, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE jobs SET
                status = ?2,
                updated_at = ?3,
                started_at = COALESCE(?4, started_at),
                finished_at = COALESCE(?5, finished_at)
            WHERE id = ?1
            ",
            params![
                id,
                stamp.status.as_str(),
                stamp.updated_at,
                stamp.started_at,
                stamp.finished_at,
            ],
        )?;
        Ok(changes)
    }

    /// Removes the job's confidence history and then the job itself in one
    /// transaction. Returns whether the job row existed.
    pub fn delete_job(&mut self, id: &str) -> Result<bool, StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM job_confidence_history WHERE job_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn record_confidence(
        &mut self,
        job_id: &str,
        confidence: f64,
        recorded_at: i64,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO job_confidence_history (job_id, confidence, recorded_at)
            VALUES (?1, ?2, ?3)
            ",
            params![job_id, confidence, recorded_at],
        )?;
        tx.execute(
            "UPDATE jobs SET verifier_last_confidence = ?2 WHERE id = ?1",
            params![job_id, confidence],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn confidence_history(&self, job_id: &str) -> Result<Vec<ConfidenceRecord>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT job_id, confidence, recorded_at
            FROM job_confidence_history
            WHERE job_id = ?1
            ORDER BY recorded_at ASC, id ASC
            ",
        )?;
        let rows = statement.query_map([job_id], |row| {
            Ok(ConfidenceRecord {
                job_id: row.get(0)?,
                confidence: row.get(1)?,
                recorded_at: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn confidence_history_count(&self, job_id: &str) -> Result<i64, StorageError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM job_confidence_history WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(4)?;
    let status = status.parse::<JobStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, err.into())
    })?;

    Ok(Job {
        id: row.get(0)?,
        job_type: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status,
        priority: row.get(5)?,
        agent_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        started_at: row.get(9)?,
        finished_at: row.get(10)?,
        result_summary: row.get(11)?,
        error_message: row.get(12)?,
        tags: row.get(13)?,
        session_key: row.get(14)?,
        fail_count: row.get(15)?,
        verifier_last_confidence: row.get(16)?,
        pr_number: row.get(17)?,
        pr_url: row.get(18)?,
        revision_count: row.get(19)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const T0: i64 = 1_708_995_600_000;

    fn new_job(id: &str, created_at: i64) -> NewJob {
        NewJob {
            title: format!("title {id}"),
            ..NewJob::new(id, created_at)
        }
    }

    #[test]
    fn migration_creates_job_tables() {
        let db = JobStore::open_in_memory().expect("open db");
        for table in ["jobs", "job_confidence_history"] {
            assert!(db.table_exists(table).expect("table check"));
        }
        assert!(!db.table_exists("tasks").expect("table check"));
        assert_eq!(
            db.schema_version().expect("schema version"),
            JOBS_SCHEMA_VERSION
        );

        db.migrate().expect("migrate is idempotent");
        assert_eq!(db.schema_version().expect("schema version"), 2);
    }

    #[test]
    fn open_rejects_newer_schema_version() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("jobs.db");
        {
            let conn = Connection::open(&path).expect("raw open");
            conn.pragma_update(None, "user_version", 9).expect("bump version");
        }

        match JobStore::open(&path) {
            Err(StorageError::UnsupportedSchemaVersion { found, supported }) => {
                assert_eq!(found, 9);
                assert_eq!(supported, JOBS_SCHEMA_VERSION);
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("newer schema should be rejected"),
        }
    }

    #[test]
    fn open_creates_parent_dirs_and_enables_wal() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested/aoc/mission-control.db");
        let db = JobStore::open(&path).expect("open db");
        assert!(path.exists());

        let mode: String = db
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("journal mode");
        assert_eq!(mode.to_lowercase(), "wal");
        let foreign_keys: i64 = db
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .expect("foreign keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn insert_and_fetch_round_trip_with_defaults() {
        let db = JobStore::open_in_memory().expect("open db");
        let job = NewJob {
            job_type: "review".to_string(),
            description: Some("check the diff".to_string()),
            priority: 3,
            agent_id: Some("session-alpha::12".to_string()),
            tags: Some("[\"infra\"]".to_string()),
            ..new_job("job-1", T0)
        };
        db.insert_job(&job).expect("insert");

        let loaded = db.job("job-1").expect("query").expect("job present");
        assert_eq!(loaded.job_type, "review");
        assert_eq!(loaded.title, "title job-1");
        assert_eq!(loaded.description.as_deref(), Some("check the diff"));
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.priority, 3);
        assert_eq!(loaded.agent_id.as_deref(), Some("session-alpha::12"));
        assert_eq!(loaded.tags.as_deref(), Some("[\"infra\"]"));
        assert_eq!(loaded.created_at, T0);
        assert_eq!(loaded.updated_at, None);
        assert_eq!(loaded.started_at, None);
        assert_eq!(loaded.finished_at, None);
        assert_eq!(loaded.fail_count, 0);
        assert_eq!(loaded.revision_count, 0);
        assert_eq!(loaded.verifier_last_confidence, None);

        assert!(db.job("missing").expect("query").is_none());
    }

    #[test]
    fn duplicate_id_is_rejected_by_primary_key() {
        let db = JobStore::open_in_memory().expect("open db");
        db.insert_job(&new_job("job-1", T0)).expect("insert");
        assert!(matches!(
            db.insert_job(&new_job("job-1", T0 + 1)),
            Err(StorageError::Sqlite(_))
        ));
    }

    #[test]
    fn status_update_keeps_untouched_timestamps() {
        let db = JobStore::open_in_memory().expect("open db");
        db.insert_job(&new_job("job-1", T0)).expect("insert");

        let changed = db
            .update_job_status("job-1", &StatusStamp::for_status(JobStatus::Running, T0 + 10))
            .expect("running");
        assert_eq!(changed, 1);
        db.update_job_status("job-1", &StatusStamp::for_status(JobStatus::Review, T0 + 20))
            .expect("review");

        let job = db.job("job-1").expect("query").expect("job");
        assert_eq!(job.status, JobStatus::Review);
        assert_eq!(job.updated_at, Some(T0 + 20));
        assert_eq!(job.started_at, Some(T0 + 10));
        assert_eq!(job.finished_at, None);

        db.update_job_status("job-1", &StatusStamp::for_status(JobStatus::Failed, T0 + 30))
            .expect("failed");
        let job = db.job("job-1").expect("query").expect("job");
        assert_eq!(job.started_at, Some(T0 + 10));
        assert_eq!(job.finished_at, Some(T0 + 30));
    }

    #[test]
    fn status_update_on_missing_job_touches_nothing() {
        let db = JobStore::open_in_memory().expect("open db");
        let changed = db
            .update_job_status("ghost", &StatusStamp::for_status(JobStatus::Done, T0))
            .expect("update");
        assert_eq!(changed, 0);
    }

    #[test]
    fn status_column_rejects_unknown_values() {
        let db = JobStore::open_in_memory().expect("open db");
        let result = db.conn.execute(
            "INSERT INTO jobs (id, status, created_at) VALUES ('bad', 'bogus', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn recent_jobs_orders_newest_first_and_applies_limit() {
        let db = JobStore::open_in_memory().expect("open db");
        for index in 0..5 {
            db.insert_job(&new_job(&format!("job-{index}"), T0 + index))
                .expect("insert");
        }

        let ids = db
            .recent_jobs(3)
            .expect("list")
            .into_iter()
            .map(|job| job.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["job-4", "job-3", "job-2"]);
    }

    #[test]
    fn delete_removes_history_and_job() {
        let mut db = JobStore::open_in_memory().expect("open db");
        db.insert_job(&new_job("job-1", T0)).expect("insert");
        db.insert_job(&new_job("job-2", T0)).expect("insert");
        db.record_confidence("job-1", 0.4, T0 + 1).expect("history 1");
        db.record_confidence("job-1", 0.9, T0 + 2).expect("history 2");
        db.record_confidence("job-2", 0.5, T0 + 3).expect("history other");

        assert!(db.delete_job("job-1").expect("delete"));
        assert!(db.job("job-1").expect("query").is_none());
        assert_eq!(db.confidence_history_count("job-1").expect("count"), 0);
        assert_eq!(db.confidence_history_count("job-2").expect("count"), 1);

        assert!(!db.delete_job("job-1").expect("delete again"));
    }

    #[test]
    fn failed_job_delete_rolls_back_history_removal() {
        let mut db = JobStore::open_in_memory().expect("open db");
        db.insert_job(&new_job("job-1", T0)).expect("insert");
        db.record_confidence("job-1", 0.7, T0 + 1).expect("history");
        db.conn
            .execute_batch(
                "
                CREATE TRIGGER block_job_delete BEFORE DELETE ON jobs
                BEGIN
                    SELECT RAISE(ABORT, 'job delete blocked');
                END;
                ",
            )
            .expect("trigger");

        assert!(db.delete_job("job-1").is_err());
        assert!(db.job("job-1").expect("query").is_some());
        assert_eq!(db.confidence_history_count("job-1").expect("count"), 1);
    }

    #[test]
    fn confidence_history_tracks_last_value() {
        let mut db = JobStore::open_in_memory().expect("open db");
        db.insert_job(&new_job("job-1", T0)).expect("insert");
        db.record_confidence("job-1", 0.25, T0 + 1).expect("first");
        db.record_confidence("job-1", 0.75, T0 + 2).expect("second");

        let history = db.confidence_history("job-1").expect("history");
        assert_eq!(
            history
                .iter()
                .map(|record| record.confidence)
                .collect::<Vec<_>>(),
            vec![0.25, 0.75]
        );
        let job = db.job("job-1").expect("query").expect("job");
        assert_eq!(job.verifier_last_confidence, Some(0.75));
    }

    #[test]
    fn confidence_for_unknown_job_violates_foreign_key() {
        let mut db = JobStore::open_in_memory().expect("open db");
        assert!(db.record_confidence("ghost", 0.5, T0).is_err());
        assert_eq!(db.confidence_history_count("ghost").expect("count"), 0);
    }
}
