//! Archive of permanently failed jobs.

mod memory;
mod service;
mod sqlite;

pub use memory::MemoryFailedJobRepository;
pub use service::FailedJobService;
pub use sqlite::SqliteFailedJobRepository;

use crate::error::QueueResult;
use crate::job::{JobId, NewJob, QueuedJob};
use crate::queue::{JobPriority, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job that exhausted its attempts or could not be run at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// ID the job had while queued.
    pub id: JobId,

    /// Queue it was taken from.
    pub queue: QueueName,

    /// Registered job name.
    pub name: String,

    /// Payload snapshot.
    pub payload: String,

    /// Priority it was queued with.
    pub priority: JobPriority,

    /// Attempts made before it was buried.
    pub attempts: u32,

    /// Stringified cause of the final failure.
    pub exception: String,

    /// When it was buried.
    pub failed_at: DateTime<Utc>,
}

impl FailedJob {
    /// Snapshots a queued job at the moment it is buried.
    pub fn from_queued(
        job: &QueuedJob,
        attempts: u32,
        exception: impl ToString,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: job.id,
            queue: job.queue.clone(),
            name: job.name.clone(),
            payload: job.payload.clone(),
            priority: job.priority,
            attempts,
            exception: exception.to_string(),
            failed_at,
        }
    }

    /// Rebuilds the job for requeueing under the same ID.
    pub fn to_new_job(&self) -> NewJob {
        NewJob::new(self.queue.clone(), self.name.clone(), self.payload.clone())
            .with_id(self.id)
            .with_priority(self.priority)
    }
}

/// Storage for failed jobs, independent of the queue driver.
#[async_trait]
pub trait FailedJobRepository: Send + Sync {
    /// Stores a failed job, replacing any record with the same ID.
    async fn store(&self, job: FailedJob) -> QueueResult<()>;

    /// Lists failed jobs, newest first.
    async fn all(&self) -> QueueResult<Vec<FailedJob>>;

    /// Finds a failed job by ID.
    async fn find(&self, id: &JobId) -> QueueResult<Option<FailedJob>>;

    /// Deletes a failed job; returns false if it did not exist.
    async fn delete(&self, id: &JobId) -> QueueResult<bool>;

    /// Counts failed jobs.
    async fn count(&self) -> QueueResult<u64>;

    /// Deletes every failed job, returning how many.
    async fn flush(&self) -> QueueResult<u64>;

    /// Deletes failed jobs buried strictly before `cutoff`, returning how many.
    async fn prune(&self, cutoff: DateTime<Utc>) -> QueueResult<u64>;
}
