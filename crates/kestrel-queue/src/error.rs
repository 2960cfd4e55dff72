//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-related errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backend storage is unreachable or rejected the operation.
    #[error("Queue connection error: {0}")]
    Connection(String),

    /// No job with this ID exists in the store.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The string is not a job ID.
    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    /// The caller's reservation on the job expired or was never held.
    #[error("Reservation lost for job {0}")]
    LeaseLost(String),

    /// The queue has never been registered with the driver.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// No definition is registered under the job name.
    #[error("No handler registered for job: {0}")]
    HandlerNotFound(String),

    /// The handler or one of its hooks failed.
    #[error("Job {job} failed: {message}")]
    Execution { job: String, message: String },

    /// The handler exceeded its timeout.
    #[error("Job {job} timed out after {timeout_ms} ms")]
    Timeout { job: String, timeout_ms: u64 },

    /// The stored payload does not match the job's payload type.
    #[error("Invalid payload for job {job}: {message}")]
    Validation { job: String, message: String },

    /// Queue name is empty or too long.
    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    /// Priority outside the 0..=5 range.
    #[error("Invalid priority: {0} (expected 0-5)")]
    InvalidPriority(i64),

    /// A reclaimed job had already used all of its attempts.
    #[error("Max attempts exceeded for job {job_id}: {attempts} attempts")]
    MaxAttemptsExceeded { job_id: String, attempts: u32 },

    /// Payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Returns true if the failure should go down the retry/backoff path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Execution { .. } | QueueError::Timeout { .. })
    }

    /// Returns true if retrying cannot help and the job must be buried now.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QueueError::HandlerNotFound(_)
                | QueueError::Validation { .. }
                | QueueError::MaxAttemptsExceeded { .. }
        )
    }

    /// Returns false when no handler ran, so the attempt counter stays put.
    pub fn consumes_attempt(&self) -> bool {
        !matches!(
            self,
            QueueError::HandlerNotFound(_) | QueueError::MaxAttemptsExceeded { .. }
        )
    }

    /// Creates an execution error.
    pub fn execution(job: impl Into<String>, message: impl ToString) -> Self {
        QueueError::Execution {
            job: job.into(),
            message: message.to_string(),
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Connection(err.to_string())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        QueueError::Connection(err.to_string())
    }
}

impl From<QueueError> for kestrel_core::KestrelError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::JobNotFound(id) => kestrel_core::KestrelError::not_found("Job", id),
            QueueError::QueueNotFound(name) => kestrel_core::KestrelError::not_found("Queue", name),
            QueueError::Connection(msg) => kestrel_core::KestrelError::Storage(msg),
            QueueError::Timeout { .. } => kestrel_core::KestrelError::Timeout(err.to_string()),
            QueueError::Configuration(msg) => kestrel_core::KestrelError::Configuration(msg),
            QueueError::InvalidQueueName(_) | QueueError::InvalidPriority(_) | QueueError::InvalidJobId(_) => {
                kestrel_core::KestrelError::Validation(err.to_string())
            }
            other => kestrel_core::KestrelError::Internal(other.to_string()),
        }
    }
}
