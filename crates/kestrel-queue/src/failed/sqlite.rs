//! SQLite failed job store.

use super::{FailedJob, FailedJobRepository};
use crate::error::{QueueError, QueueResult};
use crate::job::JobId;
use crate::pool::connect_sqlite;
use crate::queue::{JobPriority, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use tracing::info;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS kestrel_failed_jobs (
        id        TEXT    PRIMARY KEY,
        queue     TEXT    NOT NULL,
        name      TEXT    NOT NULL,
        payload   TEXT    NOT NULL,
        priority  INTEGER NOT NULL,
        attempts  INTEGER NOT NULL,
        exception TEXT    NOT NULL,
        failed_at TEXT    NOT NULL
    )
"#;

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that text
/// comparison orders them correctly.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, FromRow)]
struct FailedJobRow {
    id: String,
    queue: String,
    name: String,
    payload: String,
    priority: i64,
    attempts: i64,
    exception: String,
    failed_at: String,
}

impl TryFrom<FailedJobRow> for FailedJob {
    type Error = QueueError;

    fn try_from(row: FailedJobRow) -> Result<Self, Self::Error> {
        Ok(FailedJob {
            id: JobId::parse(&row.id)
                .map_err(|_| QueueError::Internal(format!("Corrupt failed job id: {}", row.id)))?,
            queue: QueueName::new(row.queue)?,
            name: row.name,
            payload: row.payload,
            priority: JobPriority::new(row.priority)?,
            attempts: u32::try_from(row.attempts)
                .map_err(|_| QueueError::Internal(format!("Corrupt attempt count: {}", row.attempts)))?,
            exception: row.exception,
            failed_at: DateTime::parse_from_rfc3339(&row.failed_at)
                .map_err(|e| QueueError::Internal(format!("Corrupt failed_at: {}", e)))?
                .with_timezone(&Utc),
        })
    }
}

/// Failed jobs stored in a SQLite table.
///
/// `failed_at` keeps millisecond precision.
pub struct SqliteFailedJobRepository {
    pool: SqlitePool,
}

impl SqliteFailedJobRepository {
    /// Wraps an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the database and creates the table.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let repository = Self::new(connect_sqlite(url, 2).await?);
        repository.migrate().await?;
        Ok(repository)
    }

    /// Creates the table if it does not exist.
    pub async fn migrate(&self) -> QueueResult<()> {
        info!("Running failed job migrations...");
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FailedJobRepository for SqliteFailedJobRepository {
    async fn store(&self, job: FailedJob) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO kestrel_failed_jobs
                (id, queue, name, payload, priority, attempts, exception, failed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.queue.as_str())
        .bind(&job.name)
        .bind(&job.payload)
        .bind(i64::from(job.priority.value()))
        .bind(i64::from(job.attempts))
        .bind(&job.exception)
        .bind(format_timestamp(job.failed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all(&self) -> QueueResult<Vec<FailedJob>> {
        let rows: Vec<FailedJobRow> = sqlx::query_as(
            r#"
            SELECT id, queue, name, payload, priority, attempts, exception, failed_at
            FROM kestrel_failed_jobs
            ORDER BY failed_at DESC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FailedJob::try_from).collect()
    }

    async fn find(&self, id: &JobId) -> QueueResult<Option<FailedJob>> {
        let row: Option<FailedJobRow> = sqlx::query_as(
            r#"
            SELECT id, queue, name, payload, priority, attempts, exception, failed_at
            FROM kestrel_failed_jobs
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FailedJob::try_from).transpose()
    }

    async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM kestrel_failed_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> QueueResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kestrel_failed_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn flush(&self) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM kestrel_failed_jobs")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM kestrel_failed_jobs WHERE failed_at < ?")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
