//! Job identity, lifecycle status and the queued-job envelope.

use crate::error::{QueueError, QueueResult};
use crate::queue::{JobPriority, QueueName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a job ID from its string form.
    pub fn parse(s: &str) -> QueueResult<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| QueueError::InvalidJobId(s.to_string()))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued and visible to `pop` once available.
    #[default]
    Pending,
    /// Popped by a worker and hidden from other workers.
    Reserved,
    /// Handler is running.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed and waiting for its backoff delay.
    Failed,
    /// Attempts exhausted; archived as a failed job.
    Buried,
}

impl JobStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Reserved => "reserved",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Buried => "buried",
        }
    }

    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Buried)
    }

    /// Returns true while a worker holds the job.
    pub fn is_leased(&self) -> bool {
        matches!(self, JobStatus::Reserved | JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "reserved" => Ok(JobStatus::Reserved),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "buried" => Ok(JobStatus::Buried),
            other => Err(QueueError::Internal(format!("Unknown job status: {}", other))),
        }
    }
}

/// A job handed to a driver for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Job ID. Pushing an ID that already exists replaces that job.
    pub id: JobId,

    /// Target queue.
    pub queue: QueueName,

    /// Registered job name.
    pub name: String,

    /// JSON-encoded payload.
    pub payload: String,

    /// Dequeue priority.
    pub priority: JobPriority,
}

impl NewJob {
    /// Creates a job with a fresh ID and default priority.
    pub fn new(queue: QueueName, name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            queue,
            name: name.into(),
            payload: payload.into(),
            priority: JobPriority::default(),
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Reuses an existing ID.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Builds the stored envelope.
    pub(crate) fn into_queued(self, available_at: DateTime<Utc>, now: DateTime<Utc>) -> QueuedJob {
        QueuedJob {
            id: self.id,
            queue: self.queue,
            name: self.name,
            payload: self.payload,
            priority: self.priority,
            attempts: 0,
            status: JobStatus::Pending,
            available_at,
            reserved_until: None,
            created_at: now,
        }
    }
}

/// Driver-side envelope around an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Job ID.
    pub id: JobId,

    /// Queue name.
    pub queue: QueueName,

    /// Registered job name.
    pub name: String,

    /// JSON-encoded payload.
    pub payload: String,

    /// Dequeue priority.
    pub priority: JobPriority,

    /// Attempts already made and failed.
    pub attempts: u32,

    /// Lifecycle status.
    pub status: JobStatus,

    /// The job is invisible to `pop` before this instant.
    pub available_at: DateTime<Utc>,

    /// Lease expiry while reserved or processing.
    pub reserved_until: Option<DateTime<Utc>>,

    /// When the job was first enqueued.
    pub created_at: DateTime<Utc>,
}

impl QueuedJob {
    /// Returns true if `pop` may hand this job out at `now`.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.available_at <= now,
            JobStatus::Reserved | JobStatus::Processing => self.lease_expired(now),
            _ => false,
        }
    }

    /// Returns true if a worker's lease on the job has run out.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_leased() && self.reserved_until.map_or(true, |until| until <= now)
    }

    /// Creates the execution context for the next attempt, started at `now`.
    pub fn to_context(&self, max_attempts: u32, worker_id: &str, now: DateTime<Utc>) -> JobContext {
        JobContext {
            job_id: self.id,
            job_name: self.name.clone(),
            queue: self.queue.clone(),
            attempt: self.attempts + 1,
            max_attempts,
            worker_id: worker_id.to_string(),
            started_at: now,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> QueueResult<Self> {
        serde_json::from_str(json).map_err(|e| QueueError::Internal(format!("Corrupt job record: {}", e)))
    }
}

/// Job execution context.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Registered job name.
    pub job_name: String,

    /// Queue name.
    pub queue: QueueName,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Maximum attempts allowed.
    pub max_attempts: u32,

    /// Worker processing this job.
    pub worker_id: String,

    /// Job started executing at this time.
    pub started_at: DateTime<Utc>,
}

impl JobContext {
    /// Returns true if this is the last attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Returns remaining attempts after this one.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample(status: JobStatus) -> QueuedJob {
        let now = Utc::now();
        let mut job = NewJob::new(QueueName::default(), "send_email", r#"{"to":"a@b.c"}"#)
            .into_queued(now, now);
        job.status = status;
        job
    }

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()).unwrap(), id);
        assert!(matches!(JobId::parse("nope"), Err(QueueError::InvalidJobId(_))));
    }

    #[test]
    fn test_status_from_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Reserved,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Buried,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Buried.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_pending_availability() {
        let mut job = sample(JobStatus::Pending);
        let now = job.available_at;
        assert!(job.is_available(now));

        job.available_at = now + ChronoDuration::seconds(10);
        assert!(!job.is_available(now));
        assert!(job.is_available(now + ChronoDuration::seconds(10)));
    }

    #[test]
    fn test_reserved_job_available_after_lease() {
        let mut job = sample(JobStatus::Reserved);
        let now = Utc::now();
        job.reserved_until = Some(now + ChronoDuration::seconds(30));

        assert!(!job.is_available(now));
        assert!(job.is_available(now + ChronoDuration::seconds(30)));
    }

    #[test]
    fn test_context_attempt_is_one_based() {
        let mut job = sample(JobStatus::Reserved);
        job.attempts = 2;
        let started = Utc::now() - ChronoDuration::hours(1);
        let ctx = job.to_context(3, "worker-1", started);

        assert_eq!(ctx.attempt, 3);
        assert_eq!(ctx.started_at, started);
        assert!(ctx.is_last_attempt());
        assert_eq!(ctx.remaining_attempts(), 0);
    }

    #[test]
    fn test_queued_job_json() {
        let job = sample(JobStatus::Pending);
        let restored = QueuedJob::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(job, restored);
    }
}
