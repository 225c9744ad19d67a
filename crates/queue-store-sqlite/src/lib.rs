//! SQLite-backed [`JobStore`] (spec §4.1).
//!
//! SQLite has no `FOR UPDATE SKIP LOCKED`. The serialization primitive used
//! in its place is a `BEGIN IMMEDIATE` transaction: SQLite grants the write
//! lock to exactly one connection at a time and makes the rest wait (up to
//! `busy_timeout`) or fail with `SQLITE_BUSY`. Every mutating operation here
//! runs inside one such transaction, so a whole claim-or-transition is a
//! single atomic unit from the caller's point of view.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{
    JobState, QueueError, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES,
};
use queue_core::{Job, JobSpec, JobStore, StateCounts, WorkerRegistration};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// How long a connection waits on SQLite's internal busy handler before a
/// `BEGIN IMMEDIATE` gives up and returns `SQLITE_BUSY` (spec §4.1's
/// "retried internally with bounded backoff").
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the SQLite file at `path` and runs
    /// migrations on open; there is no separate janitor process to run them.
    pub async fn open(path: &str) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn begin_immediate(&self) -> Result<Transaction<'_, Sqlite>, QueueError> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(map_sqlx_error)
    }

    async fn backoff_base(&self) -> Result<i64, QueueError> {
        match self.get_config(queue_core::BACKOFF_BASE_KEY).await? {
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| QueueError::Validation(format!("stored backoff_base {v:?} is not an integer"))),
            None => Ok(DEFAULT_BACKOFF_BASE),
        }
    }

    async fn default_max_retries(&self) -> Result<i64, QueueError> {
        match self.get_config(queue_core::MAX_RETRIES_KEY).await? {
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| QueueError::Validation(format!("stored max_retries {v:?} is not an integer"))),
            None => Ok(DEFAULT_MAX_RETRIES),
        }
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteStore {
    async fn enqueue(&self, spec: JobSpec) -> Result<String, QueueError> {
        if spec.command.trim().is_empty() {
            return Err(QueueError::Validation("command must not be empty".to_string()));
        }
        let id = spec.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let max_retries = match spec.max_retries {
            Some(n) => n,
            None => self.default_max_retries().await?,
        };
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, run_at, created_at, updated_at, started_at, claimed_by, last_error)
             VALUES (?, ?, 'pending', 0, ?, ?, ?, ?, NULL, NULL, NULL)",
        )
        .bind(&id)
        .bind(&spec.command)
        .bind(max_retries)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(e) if is_unique_violation(&e) => Err(QueueError::DuplicateId(id)),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let mut tx = match self.begin_immediate().await {
            Ok(tx) => tx,
            Err(QueueError::StoreBusy) => return Ok(None),
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let row = sqlx::query(
            "SELECT * FROM jobs
             WHERE state = 'pending' OR (state = 'failed' AND run_at <= ?)
             ORDER BY created_at ASC, id ASC
             LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(None);
        };

        let id: String = row.try_get("id").map_err(map_sqlx_error)?;

        sqlx::query(
            "UPDATE jobs SET state = 'processing', started_at = ?, updated_at = ?, claimed_by = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(worker_id)
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let updated = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(&id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(row_to_job(&updated)?))
    }

    async fn complete_job(&self, job_id: &str) -> Result<(), QueueError> {
        let mut tx = self.begin_immediate().await?;
        let state = fetch_state(&mut tx, job_id).await?;
        if state != JobState::Processing {
            return Err(QueueError::InvalidTransition(format!(
                "job {job_id} is {state}, not processing"
            )));
        }
        let now = Utc::now();
        sqlx::query("UPDATE jobs SET state = 'completed', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, error_text: &str) -> Result<(), QueueError> {
        let backoff_base = self.backoff_base().await?;
        let mut tx = self.begin_immediate().await?;

        let row = sqlx::query("SELECT state, attempts, max_retries FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let state: String = row.try_get("state").map_err(map_sqlx_error)?;
        let state = JobState::from_str(&state)?;
        if state != JobState::Processing {
            return Err(QueueError::InvalidTransition(format!(
                "job {job_id} is {state}, not processing"
            )));
        }
        let attempts: i64 = row.try_get("attempts").map_err(map_sqlx_error)?;
        let max_retries: i64 = row.try_get("max_retries").map_err(map_sqlx_error)?;
        let attempts = attempts + 1;
        let now = Utc::now();

        if attempts > max_retries {
            sqlx::query(
                "UPDATE jobs SET state = 'dead', attempts = ?, run_at = NULL, last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(attempts)
            .bind(error_text)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        } else {
            let delay_secs = backoff_base.max(1).pow(attempts.max(0) as u32);
            let run_at = now + chrono::Duration::seconds(delay_secs);
            sqlx::query(
                "UPDATE jobs SET state = 'failed', attempts = ?, run_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(attempts)
            .bind(run_at)
            .bind(error_text)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_jobs(&self, state_filter: Option<JobState>) -> Result<Vec<Job>, QueueError> {
        let rows = match state_filter {
            Some(state) => sqlx::query("SELECT * FROM jobs WHERE state = ? ORDER BY updated_at DESC")
                .bind(state.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?,
            None => sqlx::query("SELECT * FROM jobs ORDER BY updated_at DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?,
        };
        rows.iter().map(row_to_job).collect()
    }

    async fn counts_by_state(&self) -> Result<StateCounts, QueueError> {
        let rows = sqlx::query("SELECT state, COUNT(*) as n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut counts = StateCounts::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(map_sqlx_error)?;
            let n: i64 = row.try_get("n").map_err(map_sqlx_error)?;
            match JobState::from_str(&state)? {
                JobState::Pending => counts.pending = n,
                JobState::Processing => counts.processing = n,
                JobState::Failed => counts.failed = n,
                JobState::Completed => counts.completed = n,
                JobState::Dead => counts.dead = n,
            }
        }
        Ok(counts)
    }

    async fn retry_from_dlq(&self, job_id: &str) -> Result<(), QueueError> {
        let mut tx = self.begin_immediate().await?;
        let state = fetch_state(&mut tx, job_id).await?;
        if state != JobState::Dead {
            return Err(QueueError::NotDead(job_id.to_string()));
        }
        let now = Utc::now();
        sqlx::query(
            "UPDATE jobs SET state = 'pending', attempts = 0, run_at = ?, last_error = NULL,
             started_at = NULL, claimed_by = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>, QueueError> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(match row {
            Some(row) => Some(row.try_get("value").map_err(map_sqlx_error)?),
            None => None,
        })
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_config(&self) -> Result<Vec<(String, String)>, QueueError> {
        let rows = sqlx::query("SELECT key, value FROM config ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("key").map_err(map_sqlx_error)?,
                    row.try_get("value").map_err(map_sqlx_error)?,
                ))
            })
            .collect()
    }

    async fn register_worker(&self, worker_id: &str, pid: u32) -> Result<(), QueueError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO workers (worker_id, pid, started_at) VALUES (?, ?, ?)
             ON CONFLICT(worker_id) DO UPDATE SET pid = excluded.pid, started_at = excluded.started_at",
        )
        .bind(worker_id)
        .bind(pid as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn unregister_worker(&self, worker_id: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM workers WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, QueueError> {
        let rows = sqlx::query("SELECT worker_id, pid, started_at FROM workers ORDER BY worker_id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| {
                Ok(WorkerRegistration {
                    worker_id: row.try_get("worker_id").map_err(map_sqlx_error)?,
                    pid: row.try_get("pid").map_err(map_sqlx_error)?,
                    started_at: row.try_get("started_at").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }
}

async fn fetch_state(tx: &mut Transaction<'_, Sqlite>, job_id: &str) -> Result<JobState, QueueError> {
    let row = sqlx::query("SELECT state FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
    let state: String = row.try_get("state").map_err(map_sqlx_error)?;
    JobState::from_str(&state)
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, QueueError> {
    let state: String = row.try_get("state").map_err(map_sqlx_error)?;
    Ok(Job {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        command: row.try_get("command").map_err(map_sqlx_error)?,
        state: JobState::from_str(&state)?,
        attempts: row.try_get("attempts").map_err(map_sqlx_error)?,
        max_retries: row.try_get("max_retries").map_err(map_sqlx_error)?,
        run_at: row.try_get::<Option<DateTime<Utc>>, _>("run_at").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at").map_err(map_sqlx_error)?,
        claimed_by: row.try_get("claimed_by").map_err(map_sqlx_error)?,
        last_error: row.try_get("last_error").map_err(map_sqlx_error)?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

/// Maps a raw `sqlx` error onto the backend-agnostic `QueueError` the rest
/// of `queuectl` deals in. Busy/locked database errors become `StoreBusy`
/// so callers (notably `claim_next_job`) can treat lock contention as a
/// retryable condition rather than a hard failure.
fn map_sqlx_error(e: sqlx::Error) -> QueueError {
    if let Some(db_err) = e.as_database_error() {
        if let Some(code) = db_err.code() {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6).
            if code == "5" || code == "6" {
                return QueueError::StoreBusy;
            }
        }
        let message = db_err.message();
        if message.contains("database is locked") || message.contains("busy") {
            return QueueError::StoreBusy;
        }
    }
    QueueError::StoreUnavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::JobSpec;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn spec(command: &str) -> JobSpec {
        JobSpec {
            command: command.to_string(),
            id: None,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_command() {
        let (store, _dir) = temp_store().await;
        let err = store.enqueue(spec("  ")).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn enqueue_rejects_duplicate_id() {
        let (store, _dir) = temp_store().await;
        let mut s = spec("true");
        s.id = Some("dup".to_string());
        store.enqueue(s.clone()).await.unwrap();
        let err = store.enqueue(s).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn claim_transitions_pending_to_processing() {
        let (store, _dir) = temp_store().await;
        let id = store.enqueue(spec("true")).await.unwrap();
        let job = store.claim_next_job("w1").await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.claimed_by.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn claim_returns_none_when_empty() {
        let (store, _dir) = temp_store().await;
        assert!(store.claim_next_job("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_never_double_assign() {
        let (store, _dir) = temp_store().await;
        for i in 0..20 {
            let mut s = spec("true");
            s.id = Some(format!("job-{i}"));
            store.enqueue(s).await.unwrap();
        }

        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for w in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    match store.claim_next_job(&format!("w{w}")).await.unwrap() {
                        Some(job) => claimed.push(job.id),
                        None => break,
                    }
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        let mut dedup = all.clone();
        dedup.dedup();
        assert_eq!(all.len(), dedup.len());
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn complete_requires_processing_state() {
        let (store, _dir) = temp_store().await;
        let id = store.enqueue(spec("true")).await.unwrap();
        let err = store.complete_job(&id).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn fail_job_retries_then_dead_letters() {
        let (store, _dir) = temp_store().await;
        let mut s = spec("false");
        s.max_retries = Some(1);
        let id = store.enqueue(s).await.unwrap();

        store.claim_next_job("w1").await.unwrap();
        store.fail_job(&id, "boom").await.unwrap();
        let job = store.list_jobs(None).await.unwrap().into_iter().next().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);

        sqlx::query("UPDATE jobs SET state = 'processing' WHERE id = ?")
            .bind(&id)
            .execute(&store.pool)
            .await
            .unwrap();
        store.fail_job(&id, "boom again").await.unwrap();
        let job = store.list_jobs(None).await.unwrap().into_iter().next().unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 2);
        assert!(job.run_at.is_none());
    }

    #[tokio::test]
    async fn retry_from_dlq_resets_job() {
        let (store, _dir) = temp_store().await;
        let mut s = spec("false");
        s.max_retries = Some(0);
        let id = store.enqueue(s).await.unwrap();
        store.claim_next_job("w1").await.unwrap();
        store.fail_job(&id, "boom").await.unwrap();

        let err = store.retry_from_dlq("missing").await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));

        store.retry_from_dlq(&id).await.unwrap();
        let job = store.list_jobs(None).await.unwrap().into_iter().next().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn retry_from_dlq_rejects_non_dead_job() {
        let (store, _dir) = temp_store().await;
        let id = store.enqueue(spec("true")).await.unwrap();
        let err = store.retry_from_dlq(&id).await.unwrap_err();
        assert!(matches!(err, QueueError::NotDead(_)));
    }

    #[tokio::test]
    async fn config_roundtrip() {
        let (store, _dir) = temp_store().await;
        assert_eq!(store.get_config("backoff_base").await.unwrap(), None);
        store.set_config("backoff_base", "5").await.unwrap();
        assert_eq!(
            store.get_config("backoff_base").await.unwrap(),
            Some("5".to_string())
        );
        store.set_config("backoff_base", "7").await.unwrap();
        assert_eq!(
            store.get_config("backoff_base").await.unwrap(),
            Some("7".to_string())
        );
        let all = store.list_config().await.unwrap();
        assert_eq!(all, vec![("backoff_base".to_string(), "7".to_string())]);
    }

    #[tokio::test]
    async fn counts_by_state_reflects_all_buckets() {
        let (store, _dir) = temp_store().await;
        for _ in 0..3 {
            store.enqueue(spec("true")).await.unwrap();
        }
        let counts = store.counts_by_state().await.unwrap();
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.processing, 0);
    }

    #[tokio::test]
    async fn worker_registration_roundtrip() {
        let (store, _dir) = temp_store().await;
        store.register_worker("w1", 1234).await.unwrap();
        let workers = store.list_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].worker_id, "w1");
        assert_eq!(workers[0].pid, 1234);
        store.unregister_worker("w1").await.unwrap();
        assert!(store.list_workers().await.unwrap().is_empty());
    }
}
