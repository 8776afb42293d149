//! Durable job storage backed by SQLite.
//!
//! The store is the single source of truth every worker coordinates through.
//! Cross-worker exclusivity rests entirely on [`JobStore::acquire_job`]: a
//! single conditional `UPDATE` whose predicate re-checks readiness at update
//! time, so two workers racing on the same id can never both succeed.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::job::{Job, JobId, JobState, UnknownJobState};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    next_retry_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
CREATE INDEX IF NOT EXISTS idx_jobs_next_retry_at ON jobs(next_retry_at);
"#;

const JOB_COLUMNS: &str = r#"
    id,
    command,
    state,
    attempts,
    max_retries,
    next_retry_at,
    created_at,
    updated_at,
    completed_at,
    error_message
"#;

/// Errors surfaced by the storage engine.
///
/// A lost acquisition race is not an error; [`JobStore::acquire_job`] reports
/// it as an ordinary `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job `{0}` already exists")]
    AlreadyExists(JobId),
    #[error("job `{0}` not found")]
    NotFound(JobId),
    #[error("job is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid data in the job store: {0}")]
    Corrupt(String),
    #[error("job store failure: {0}")]
    Database(#[from] sqlx::Error),
}

/// Concurrency-safe persistence of [`Job`] records.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Opens (creating if necessary) the job database at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Opens an in-memory store.
    ///
    /// Provided for testing purposes; an in-memory database is lost when the
    /// store is dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // One connection only: each new in-memory connection is a fresh,
        // empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(SqliteConnectOptions::new().filename(":memory:"))
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Inserts a new job in the `pending` state.
    pub async fn create_job(
        &self,
        id: JobId,
        command: &str,
        max_retries: u32,
    ) -> Result<Job, StoreError> {
        if id.is_empty() {
            return Err(StoreError::MissingField("id"));
        }
        if command.trim().is_empty() {
            return Err(StoreError::MissingField("command"));
        }

        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(id.as_str())
        .bind(command)
        .bind(JobState::Pending.as_str())
        .bind(max_retries)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        if let Err(error) = result {
            if error
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                return Err(StoreError::AlreadyExists(id));
            }
            return Err(error.into());
        }

        self.get_job(&id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Fetches a job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Lists jobs, optionally filtered by state, newest created first.
    pub async fn list_jobs(
        &self,
        state: Option<JobState>,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = match state {
            Some(state) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(job_from_row).collect()
    }

    /// The jobs currently in the dead letter queue, newest first.
    pub async fn dlq_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        self.list_jobs(Some(JobState::Dead), limit).await
    }

    /// Jobs eligible for acquisition, oldest created first.
    ///
    /// A job is ready when it is `pending` or `failed` and any backoff delay
    /// has elapsed.
    pub async fn ready_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let now = format_timestamp(Utc::now());
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE state IN ('pending', 'failed')
            AND (next_retry_at IS NULL OR next_retry_at <= ?)
            ORDER BY created_at ASC
            LIMIT ?
            "#
        ))
        .bind(&now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Atomically transitions a job to `processing` if it is still ready.
    ///
    /// The readiness predicate is evaluated inside the `UPDATE` itself, so a
    /// stale read simply loses the race here and yields `false`.
    pub async fn acquire_job(&self, id: &JobId) -> Result<bool, StoreError> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE jobs SET state = 'processing', updated_at = ?
            WHERE id = ?
            AND state IN ('pending', 'failed')
            AND (next_retry_at IS NULL OR next_retry_at <= ?)
            "#,
        )
        .bind(&now)
        .bind(id.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persists the outcome of an execution attempt, refreshing `updated_at`.
    pub async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                state = ?,
                attempts = ?,
                next_retry_at = ?,
                completed_at = ?,
                error_message = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.next_retry_at.map(format_timestamp))
        .bind(job.completed_at.map(format_timestamp))
        .bind(job.error_message.as_deref())
        .bind(&now)
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id.clone()));
        }
        Ok(())
    }

    /// Resets a dead letter queue job back to `pending` with zero attempts.
    ///
    /// Guarded by the state predicate: a job in any other state is left
    /// untouched and reported as not found.
    pub async fn reset_for_retry(&self, id: &JobId) -> Result<Job, StoreError> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                state = 'pending',
                attempts = 0,
                next_retry_at = NULL,
                error_message = NULL,
                updated_at = ?
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(&now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        self.get_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// The number of jobs in each state.
    pub async fn stats(&self) -> Result<HashMap<JobState, i64>, StoreError> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let state = parse_state(&row.try_get::<String, _>("state")?)?;
                let count: i64 = row.try_get("count")?;
                Ok((state, count))
            })
            .collect()
    }
}

/// Timestamps are stored as UTC RFC 3339 text with a trailing `Z` and
/// microsecond precision, so lexicographic order matches chronological order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| StoreError::Corrupt(format!("bad timestamp `{raw}`: {error}")))
}

fn parse_state(raw: &str) -> Result<JobState, StoreError> {
    raw.parse()
        .map_err(|error: UnknownJobState| StoreError::Corrupt(error.to_string()))
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    Ok(Job {
        id: row.try_get::<String, _>("id")?.into(),
        command: row.try_get("command")?,
        state: parse_state(&row.try_get::<String, _>("state")?)?,
        attempts: row.try_get::<u32, _>("attempts")?,
        max_retries: row.try_get::<u32, _>("max_retries")?,
        next_retry_at: row
            .try_get::<Option<String>, _>("next_retry_at")?
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        completed_at: row
            .try_get::<Option<String>, _>("completed_at")?
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        error_message: row.try_get("error_message")?,
    })
}
