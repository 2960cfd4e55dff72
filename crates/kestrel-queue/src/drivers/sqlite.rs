//! SQLite-backed queue driver.

use crate::clock::{system_clock, to_chrono, Clock};
use crate::error::{QueueError, QueueResult};
use crate::job::{JobId, JobStatus, NewJob, QueuedJob};
use crate::pool::connect_sqlite;
use crate::queue::{JobPriority, QueueDriver, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS kestrel_jobs (
        seq            INTEGER PRIMARY KEY AUTOINCREMENT,
        id             TEXT    NOT NULL UNIQUE,
        queue          TEXT    NOT NULL,
        name           TEXT    NOT NULL,
        payload        TEXT    NOT NULL,
        priority       INTEGER NOT NULL,
        attempts       INTEGER NOT NULL DEFAULT 0,
        status         TEXT    NOT NULL,
        available_at   INTEGER NOT NULL,
        reserved_until INTEGER,
        created_at     INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_kestrel_jobs_pop
        ON kestrel_jobs (queue, status, priority DESC, seq)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS kestrel_queues (
        name       TEXT    PRIMARY KEY,
        created_at INTEGER NOT NULL
    )
    "#,
];

const JOB_COLUMNS: &str =
    "seq, id, queue, name, payload, priority, attempts, status, available_at, reserved_until, created_at";

#[derive(Debug, FromRow)]
struct JobRow {
    seq: i64,
    id: String,
    queue: String,
    name: String,
    payload: String,
    priority: i64,
    attempts: i64,
    status: String,
    available_at: i64,
    reserved_until: Option<i64>,
    created_at: i64,
}

fn from_millis(ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Internal(format!("Timestamp out of range: {}", ms)))
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(QueuedJob {
            id: JobId::parse(&row.id)
                .map_err(|_| QueueError::Internal(format!("Corrupt job id: {}", row.id)))?,
            queue: QueueName::new(row.queue)?,
            name: row.name,
            payload: row.payload,
            priority: JobPriority::new(row.priority)?,
            attempts: u32::try_from(row.attempts)
                .map_err(|_| QueueError::Internal(format!("Corrupt attempt count: {}", row.attempts)))?,
            status: row.status.parse()?,
            available_at: from_millis(row.available_at)?,
            reserved_until: row.reserved_until.map(from_millis).transpose()?,
            created_at: from_millis(row.created_at)?,
        })
    }
}

/// Queue driver storing jobs in SQLite.
///
/// `pop` is a single `UPDATE ... RETURNING` statement, so concurrent pollers
/// sharing the database never reserve the same job twice.
pub struct SqliteDriver {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    reservation_timeout: Duration,
}

impl SqliteDriver {
    /// Wraps an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, reservation_timeout: Duration) -> Self {
        Self {
            pool,
            clock,
            reservation_timeout,
        }
    }

    /// Opens the database and creates the schema.
    pub async fn connect(url: &str, max_connections: u32, reservation_timeout: Duration) -> QueueResult<Self> {
        let pool = connect_sqlite(url, max_connections).await?;
        let driver = Self::new(pool, system_clock(), reservation_timeout);
        driver.migrate().await?;
        Ok(driver)
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates the tables if they do not exist.
    pub async fn migrate(&self) -> QueueResult<()> {
        info!("Running queue migrations...");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns a copy of a stored job.
    pub async fn get(&self, id: &JobId) -> QueueResult<Option<QueuedJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {} FROM kestrel_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueuedJob::try_from).transpose()
    }

    async fn insert(&self, job: QueuedJob) -> QueueResult<JobId> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO kestrel_jobs
                (id, queue, name, payload, priority, attempts, status, available_at, reserved_until, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.queue.as_str())
        .bind(&job.name)
        .bind(&job.payload)
        .bind(i64::from(job.priority.value()))
        .bind(i64::from(job.attempts))
        .bind(job.status.as_str())
        .bind(job.available_at.timestamp_millis())
        .bind(job.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO kestrel_queues (name, created_at) VALUES (?, ?)")
            .bind(job.queue.as_str())
            .bind(job.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(job_id = %job.id, queue = %job.queue, "Job pushed");
        Ok(job.id)
    }

    /// Explains why a lease-guarded statement touched no row.
    async fn lease_error(&self, id: &JobId) -> QueueResult<QueueError> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM kestrel_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(match found {
            Some(_) => QueueError::LeaseLost(id.to_string()),
            None => QueueError::JobNotFound(id.to_string()),
        })
    }
}

#[async_trait]
impl QueueDriver for SqliteDriver {
    async fn push(&self, job: NewJob) -> QueueResult<JobId> {
        let now = self.clock.now();
        self.insert(job.into_queued(now, now)).await
    }

    async fn later(&self, job: NewJob, delay: Duration) -> QueueResult<JobId> {
        let now = self.clock.now();
        self.insert(job.into_queued(now + to_chrono(delay), now)).await
    }

    async fn pop(&self, queue: &QueueName) -> QueueResult<Option<QueuedJob>> {
        Ok(self.pop_many(queue, 1).await?.into_iter().next())
    }

    async fn pop_many(&self, queue: &QueueName, limit: usize) -> QueueResult<Vec<QueuedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let reserved_until = (now + to_chrono(self.reservation_timeout)).timestamp_millis();

        // Expired leases come back with one more attempt counted.
        let sql = format!(
            r#"
            UPDATE kestrel_jobs
            SET status = 'reserved',
                attempts = attempts + CASE WHEN status = 'pending' THEN 0 ELSE 1 END,
                reserved_until = ?
            WHERE seq IN (
                SELECT seq FROM kestrel_jobs
                WHERE queue = ?
                  AND ((status = 'pending' AND available_at <= ?)
                    OR (status IN ('reserved', 'processing') AND reserved_until <= ?))
                ORDER BY priority DESC, seq ASC
                LIMIT ?
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let mut rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(reserved_until)
            .bind(queue.as_str())
            .bind(now_ms)
            .bind(now_ms)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        rows.into_iter().map(QueuedJob::try_from).collect()
    }

    async fn mark_processing(&self, id: &JobId, lease: Duration) -> QueueResult<()> {
        let until = (self.clock.now() + to_chrono(lease)).timestamp_millis();

        let result = sqlx::query(
            r#"
            UPDATE kestrel_jobs
            SET status = 'processing', reserved_until = ?
            WHERE id = ? AND status IN ('reserved', 'processing')
            "#,
        )
        .bind(until)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_error(id).await?);
        }
        Ok(())
    }

    async fn complete(&self, id: &JobId) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM kestrel_jobs
            WHERE id = ? AND status IN ('reserved', 'processing') AND reserved_until > ?
            "#,
        )
        .bind(id.to_string())
        .bind(self.clock.now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_error(id).await?);
        }
        Ok(())
    }

    async fn release(&self, id: &JobId, delay: Duration) -> QueueResult<()> {
        let now = self.clock.now();
        let available_at = (now + to_chrono(delay)).timestamp_millis();

        let result = sqlx::query(
            r#"
            UPDATE kestrel_jobs
            SET status = ?, attempts = attempts + 1, available_at = ?, reserved_until = NULL
            WHERE id = ? AND status IN ('reserved', 'processing') AND reserved_until > ?
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(available_at)
        .bind(id.to_string())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_error(id).await?);
        }
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> QueueResult<()> {
        let result = sqlx::query("DELETE FROM kestrel_jobs WHERE id = ? AND status IN ('reserved', 'processing')")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_error(id).await?);
        }
        Ok(())
    }

    async fn size(&self, queue: &QueueName) -> QueueResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kestrel_jobs WHERE queue = ?")
            .bind(queue.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn clear(&self, queue: &QueueName) -> QueueResult<u64> {
        let mut tx = self.pool.begin().await?;

        let known: Option<(String,)> = sqlx::query_as("SELECT name FROM kestrel_queues WHERE name = ?")
            .bind(queue.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if known.is_none() {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }

        let result = sqlx::query("DELETE FROM kestrel_jobs WHERE queue = ?")
            .bind(queue.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    async fn queues(&self) -> QueueResult<Vec<QueueName>> {
        let names: Vec<(String,)> = sqlx::query_as("SELECT name FROM kestrel_queues ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        names.into_iter().map(|(name,)| QueueName::new(name)).collect()
    }

    async fn health_check(&self) -> QueueResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Connection(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}
