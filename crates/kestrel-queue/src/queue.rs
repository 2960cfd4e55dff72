//! Queue names, priorities and the driver abstraction.

use crate::error::{QueueError, QueueResult};
use crate::job::{JobId, NewJob, QueuedJob};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Name used when nothing else selects a queue.
pub const DEFAULT_QUEUE: &str = "default";

/// Longest accepted queue name, in characters.
pub const MAX_QUEUE_NAME_LEN: usize = 255;

/// Validated queue name (1-255 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Creates a queue name, rejecting empty and over-long names.
    pub fn new(name: impl Into<String>) -> QueueResult<Self> {
        let name = name.into();
        let len = name.chars().count();
        if len == 0 || len > MAX_QUEUE_NAME_LEN {
            return Err(QueueError::InvalidQueueName(name));
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self(DEFAULT_QUEUE.to_string())
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for QueueName {
    type Error = QueueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for QueueName {
    type Error = QueueError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Job priority levels, 0 (lowest, default) to 5 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct JobPriority(u8);

impl JobPriority {
    /// Lowest priority (default).
    pub const LOWEST: Self = Self(0);
    /// Normal priority.
    pub const NORMAL: Self = Self(2);
    /// Highest priority.
    pub const HIGHEST: Self = Self(5);

    /// Creates a priority, rejecting values outside 0..=5.
    pub fn new(value: i64) -> QueueResult<Self> {
        match u8::try_from(value) {
            Ok(v) if v <= Self::HIGHEST.0 => Ok(Self(v)),
            _ => Err(QueueError::InvalidPriority(value)),
        }
    }

    /// Returns the numeric value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for JobPriority {
    type Error = QueueError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobPriority> for u8 {
    fn from(priority: JobPriority) -> Self {
        priority.0
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Producer-side overrides for a single push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Queue override.
    pub queue: Option<QueueName>,

    /// Priority override.
    pub priority: Option<JobPriority>,
}

impl PushOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the job to a specific queue.
    pub fn on_queue(mut self, queue: QueueName) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Overrides the priority.
    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Storage backend for queued jobs.
///
/// Every mutation of a single job is atomic. `pop` never hands the same job
/// to two callers while its lease is live. Batch operations are atomic per
/// job only.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Stores a job as pending and immediately available.
    async fn push(&self, job: NewJob) -> QueueResult<JobId>;

    /// Stores a job that becomes available after `delay`.
    async fn later(&self, job: NewJob, delay: Duration) -> QueueResult<JobId>;

    /// Reserves the next available job: highest priority first, then
    /// enqueue order.
    async fn pop(&self, queue: &QueueName) -> QueueResult<Option<QueuedJob>>;

    /// Reserves up to `limit` available jobs.
    async fn pop_many(&self, queue: &QueueName, limit: usize) -> QueueResult<Vec<QueuedJob>>;

    /// Marks a reserved job as running and extends its lease.
    ///
    /// Fails with [`QueueError::LeaseLost`] unless the job is reserved or
    /// processing.
    async fn mark_processing(&self, id: &JobId, lease: Duration) -> QueueResult<()>;

    /// Removes a finished job. The lease must not have expired.
    async fn complete(&self, id: &JobId) -> QueueResult<()>;

    /// Returns a job to pending after `delay`, counting one more attempt.
    /// The lease must not have expired.
    async fn release(&self, id: &JobId, delay: Duration) -> QueueResult<()>;

    /// Removes a reserved or processing job without completing it.
    async fn delete(&self, id: &JobId) -> QueueResult<()>;

    /// Counts every job held for the queue, whatever its status.
    async fn size(&self, queue: &QueueName) -> QueueResult<u64>;

    /// Removes every job held for the queue, returning how many.
    async fn clear(&self, queue: &QueueName) -> QueueResult<u64>;

    /// Lists registered queues.
    async fn queues(&self) -> QueueResult<Vec<QueueName>>;

    /// Health check.
    async fn health_check(&self) -> QueueResult<()> {
        Ok(())
    }
}
