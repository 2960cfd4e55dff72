//! Redis queue driver implementation.

use super::scripts;
use super::{create_pool, ready_score, RedisKeys};
use crate::clock::{system_clock, to_chrono, Clock};
use crate::config::RedisConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{JobId, NewJob, QueuedJob};
use crate::queue::{JobPriority, QueueDriver, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct Scripts {
    push: Script,
    pop: Script,
    mark_processing: Script,
    release: Script,
    delete: Script,
    clear: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            push: Script::new(scripts::PUSH),
            pop: Script::new(scripts::POP),
            mark_processing: Script::new(scripts::MARK_PROCESSING),
            release: Script::new(scripts::RELEASE),
            delete: Script::new(scripts::DELETE),
            clear: Script::new(scripts::CLEAR),
        }
    }
}

/// Queue driver storing jobs in Redis.
///
/// Each job lives in its own hash; per-queue sorted sets track ready,
/// delayed and reserved jobs. Every transition runs as one Lua script.
pub struct RedisDriver {
    pool: Pool,
    keys: RedisKeys,
    scripts: Scripts,
    clock: Arc<dyn Clock>,
    reservation_timeout: Duration,
}

impl RedisDriver {
    /// Wraps an existing pool.
    pub fn new(pool: Pool, keys: RedisKeys, reservation_timeout: Duration) -> Self {
        Self {
            pool,
            keys,
            scripts: Scripts::load(),
            clock: system_clock(),
            reservation_timeout,
        }
    }

    /// Connects using configuration.
    pub async fn connect(config: &RedisConfig, reservation_timeout: Duration) -> QueueResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool, RedisKeys::new(&config.key_prefix), reservation_timeout))
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn insert(&self, job: NewJob, available_at: DateTime<Utc>) -> QueueResult<JobId> {
        let mut conn = self.pool.get().await?;
        let now = self.clock.now();

        let seq: u64 = conn.incr(self.keys.seq(), 1u64).await?;
        let score = ready_score(job.priority, seq);

        let _: i64 = self
            .scripts
            .push
            .arg(self.keys.prefix())
            .arg(job.id.to_string())
            .arg(job.queue.as_str())
            .arg(&job.name)
            .arg(&job.payload)
            .arg(i64::from(job.priority.value()))
            .arg(available_at.timestamp_millis())
            .arg(now.timestamp_millis())
            .arg(score)
            .invoke_async(&mut *conn)
            .await?;

        debug!(job_id = %job.id, queue = %job.queue, "Job pushed");
        Ok(job.id)
    }

    /// Deletes a leased job; given `now`, only if the lease is still live.
    async fn remove(&self, id: &JobId, now: Option<DateTime<Utc>>) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        let deadline = now.map(|t| t.timestamp_millis().to_string()).unwrap_or_default();

        let reply: i64 = self
            .scripts
            .delete
            .arg(self.keys.prefix())
            .arg(id.to_string())
            .arg(deadline)
            .invoke_async(&mut *conn)
            .await?;

        lease_result(id, reply)
    }
}

/// Maps the -1/0/1 reply of a lease-guarded script.
fn lease_result(id: &JobId, reply: i64) -> QueueResult<()> {
    match reply {
        1 => Ok(()),
        0 => Err(QueueError::LeaseLost(id.to_string())),
        _ => Err(QueueError::JobNotFound(id.to_string())),
    }
}

fn field<'a>(hash: &'a HashMap<String, String>, name: &str) -> QueueResult<&'a str> {
    hash.get(name)
        .map(String::as_str)
        .ok_or_else(|| QueueError::Internal(format!("Job record missing field: {}", name)))
}

fn number(hash: &HashMap<String, String>, name: &str) -> QueueResult<i64> {
    let raw = field(hash, name)?;
    raw.parse()
        .map_err(|_| QueueError::Internal(format!("Job record field {} is not a number: {}", name, raw)))
}

fn timestamp(ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Internal(format!("Timestamp out of range: {}", ms)))
}

/// Decodes a job hash returned by HGETALL.
pub(crate) fn job_from_hash(hash: &HashMap<String, String>) -> QueueResult<QueuedJob> {
    let reserved_until = match hash.get("reserved_until") {
        Some(raw) if !raw.is_empty() => Some(timestamp(raw.parse().map_err(|_| {
            QueueError::Internal(format!("Job record field reserved_until is not a number: {}", raw))
        })?)?),
        _ => None,
    };

    Ok(QueuedJob {
        id: JobId::parse(field(hash, "id")?)
            .map_err(|e| QueueError::Internal(format!("Corrupt job id: {}", e)))?,
        queue: QueueName::new(field(hash, "queue")?)?,
        name: field(hash, "name")?.to_string(),
        payload: field(hash, "payload")?.to_string(),
        priority: JobPriority::new(number(hash, "priority")?)?,
        attempts: u32::try_from(number(hash, "attempts")?)
            .map_err(|_| QueueError::Internal("Corrupt attempt count".to_string()))?,
        status: field(hash, "status")?.parse()?,
        available_at: timestamp(number(hash, "available_at")?)?,
        reserved_until,
        created_at: timestamp(number(hash, "created_at")?)?,
    })
}

#[async_trait]
impl QueueDriver for RedisDriver {
    async fn push(&self, job: NewJob) -> QueueResult<JobId> {
        let now = self.clock.now();
        self.insert(job, now).await
    }

    async fn later(&self, job: NewJob, delay: Duration) -> QueueResult<JobId> {
        let available_at = self.clock.now() + to_chrono(delay);
        self.insert(job, available_at).await
    }

    async fn pop(&self, queue: &QueueName) -> QueueResult<Option<QueuedJob>> {
        Ok(self.pop_many(queue, 1).await?.into_iter().next())
    }

    async fn pop_many(&self, queue: &QueueName, limit: usize) -> QueueResult<Vec<QueuedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.get().await?;
        let now = self.clock.now();
        let reserved_until = now + to_chrono(self.reservation_timeout);

        let hashes: Vec<HashMap<String, String>> = self
            .scripts
            .pop
            .arg(self.keys.prefix())
            .arg(queue.as_str())
            .arg(now.timestamp_millis())
            .arg(reserved_until.timestamp_millis())
            .arg(limit)
            .invoke_async(&mut *conn)
            .await?;

        hashes.iter().map(job_from_hash).collect()
    }

    async fn mark_processing(&self, id: &JobId, lease: Duration) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        let until = self.clock.now() + to_chrono(lease);

        let result: i64 = self
            .scripts
            .mark_processing
            .arg(self.keys.prefix())
            .arg(id.to_string())
            .arg(until.timestamp_millis())
            .invoke_async(&mut *conn)
            .await?;

        lease_result(id, result)
    }

    async fn complete(&self, id: &JobId) -> QueueResult<()> {
        self.remove(id, Some(self.clock.now())).await
    }

    async fn release(&self, id: &JobId, delay: Duration) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        let now = self.clock.now();
        let available_at = now + to_chrono(delay);

        let released: i64 = self
            .scripts
            .release
            .arg(self.keys.prefix())
            .arg(id.to_string())
            .arg(available_at.timestamp_millis())
            .arg(now.timestamp_millis())
            .invoke_async(&mut *conn)
            .await?;

        lease_result(id, released)
    }

    async fn delete(&self, id: &JobId) -> QueueResult<()> {
        self.remove(id, None).await
    }

    async fn size(&self, queue: &QueueName) -> QueueResult<u64> {
        let mut conn = self.pool.get().await?;

        let (ready, delayed, reserved): (u64, u64, u64) = redis::pipe()
            .zcard(self.keys.ready(queue.as_str()))
            .zcard(self.keys.delayed(queue.as_str()))
            .zcard(self.keys.reserved(queue.as_str()))
            .query_async(&mut *conn)
            .await?;

        Ok(ready + delayed + reserved)
    }

    async fn clear(&self, queue: &QueueName) -> QueueResult<u64> {
        let mut conn = self.pool.get().await?;

        let removed: i64 = self
            .scripts
            .clear
            .arg(self.keys.prefix())
            .arg(queue.as_str())
            .invoke_async(&mut *conn)
            .await?;

        u64::try_from(removed).map_err(|_| QueueError::QueueNotFound(queue.to_string()))
    }

    async fn queues(&self) -> QueueResult<Vec<QueueName>> {
        let mut conn = self.pool.get().await?;
        let mut names: Vec<String> = conn.smembers(self.keys.queues()).await?;
        names.sort();
        names.into_iter().map(QueueName::new).collect()
    }

    async fn health_check(&self) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    fn hash(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_job_from_hash() {
        let id = JobId::new().to_string();
        let record = hash(&[
            ("id", id.as_str()),
            ("queue", "emails"),
            ("name", "send_email"),
            ("payload", r#"{"to":"a@b.c"}"#),
            ("priority", "4"),
            ("attempts", "2"),
            ("status", "reserved"),
            ("available_at", "1700000000000"),
            ("reserved_until", "1700000030000"),
            ("created_at", "1699999999000"),
            ("score", "1000000000000003"),
        ]);

        let job = job_from_hash(&record).unwrap();
        assert_eq!(job.id.to_string(), id);
        assert_eq!(job.queue.as_str(), "emails");
        assert_eq!(job.priority.value(), 4);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.status, JobStatus::Reserved);
        assert_eq!(job.reserved_until.unwrap().timestamp_millis(), 1_700_000_030_000);
    }

    #[test]
    fn test_job_from_hash_without_lease() {
        let id = JobId::new().to_string();
        let record = hash(&[
            ("id", id.as_str()),
            ("queue", "default"),
            ("name", "noop"),
            ("payload", "{}"),
            ("priority", "0"),
            ("attempts", "0"),
            ("status", "pending"),
            ("available_at", "1700000000000"),
            ("created_at", "1700000000000"),
        ]);

        assert!(job_from_hash(&record).unwrap().reserved_until.is_none());
    }

    #[test]
    fn test_lease_result_replies() {
        let id = JobId::new();
        assert!(lease_result(&id, 1).is_ok());
        assert!(matches!(lease_result(&id, 0), Err(QueueError::LeaseLost(_))));
        assert!(matches!(lease_result(&id, -1), Err(QueueError::JobNotFound(_))));
    }

    #[test]
    fn test_job_from_hash_missing_field() {
        let record = hash(&[("id", "not-even-a-uuid")]);
        assert!(matches!(job_from_hash(&record), Err(QueueError::Internal(_))));
    }
}
