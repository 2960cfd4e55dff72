//! Queue subsystem configuration.

use crate::backoff::BackoffConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueName, DEFAULT_QUEUE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Configuration for the queue subsystem.
///
/// Read once at startup and passed to drivers and workers by value.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueueConfig {
    /// Queue used when neither the definition nor the push options name one.
    #[serde(default = "default_queue")]
    #[validate(length(min = 1, max = 255))]
    pub default_queue: String,

    /// Default maximum attempts per job.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// Default handler timeout in seconds.
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,

    /// Sleep between polls of an empty queue, in milliseconds.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Lease granted by `pop`, in seconds.
    #[serde(default = "default_reservation_timeout")]
    #[validate(range(min = 1))]
    pub reservation_timeout_secs: u64,

    /// Extra lease on top of the handler timeout while a job runs, in seconds.
    #[serde(default = "default_reservation_grace")]
    pub reservation_grace_secs: u64,

    /// Default backoff when a definition sets neither `backoff` nor `retry_after`.
    #[serde(default)]
    #[validate(custom(function = "validate_backoff"))]
    pub backoff: BackoffConfig,

    /// Worker pool configuration.
    #[serde(default)]
    #[validate(nested)]
    pub worker: WorkerConfig,

    /// Queue driver selection.
    #[serde(default)]
    pub driver: DriverConfig,

    /// Failed job store selection.
    #[serde(default)]
    pub failed: FailedStoreConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_queue: default_queue(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout(),
            poll_interval_ms: default_poll_interval(),
            reservation_timeout_secs: default_reservation_timeout(),
            reservation_grace_secs: default_reservation_grace(),
            backoff: BackoffConfig::default(),
            worker: WorkerConfig::default(),
            driver: DriverConfig::default(),
            failed: FailedStoreConfig::default(),
        }
    }
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_reservation_timeout() -> u64 {
    90
}

fn default_reservation_grace() -> u64 {
    30
}

fn validate_backoff(backoff: &BackoffConfig) -> Result<(), ValidationError> {
    match backoff {
        BackoffConfig::Exponential {
            initial_delay_ms,
            multiplier,
            max_delay_ms,
        } => {
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(ValidationError::new("backoff_multiplier_below_one"));
            }
            if initial_delay_ms > max_delay_ms {
                return Err(ValidationError::new("backoff_initial_exceeds_max"));
            }
            Ok(())
        }
        BackoffConfig::Fixed { .. } => Ok(()),
    }
}

impl QueueConfig {
    /// Returns the default queue as a validated name.
    pub fn default_queue_name(&self) -> QueueResult<QueueName> {
        QueueName::new(self.default_queue.clone())
    }

    /// Returns the default timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the reservation timeout as Duration.
    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_timeout_secs)
    }

    /// Returns the reservation grace as Duration.
    pub fn reservation_grace(&self) -> Duration {
        Duration::from_secs(self.reservation_grace_secs)
    }

    /// Validates the configuration, reporting problems as a queue error.
    pub fn check(&self) -> QueueResult<()> {
        self.validate()
            .map_err(|e| QueueError::Configuration(kestrel_core::validation_errors_to_kestrel_error(e).to_string()))
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 1024))]
    pub concurrency: usize,

    /// Queues to process, in priority order.
    #[serde(default = "default_worker_queues")]
    #[validate(length(min = 1))]
    pub queues: Vec<String>,

    /// Shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queues: default_worker_queues(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_worker_queues() -> Vec<String> {
    vec![DEFAULT_QUEUE.to_string()]
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl WorkerConfig {
    /// Returns the configured queues as validated names.
    pub fn queue_names(&self) -> QueueResult<Vec<QueueName>> {
        self.queues.iter().map(|q| QueueName::new(q.clone())).collect()
    }

    /// Returns the shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Queue driver selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverConfig {
    /// In-process memory store.
    #[default]
    Memory,
    /// Run jobs inline on push.
    Sync,
    /// SQLite database.
    Sqlite {
        /// Connection URL, e.g. `sqlite://queue.db?mode=rwc`.
        #[serde(default = "default_sqlite_url")]
        url: String,
        /// Connection pool size.
        #[serde(default = "default_sqlite_pool_size")]
        pool_size: u32,
    },
    /// Redis server.
    Redis(RedisConfig),
}

fn default_sqlite_url() -> String {
    "sqlite://kestrel-queue.db?mode=rwc".to_string()
}

fn default_sqlite_pool_size() -> u32 {
    5
}

/// Redis connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for all queue keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "kestrel:queue".to_string()
}

/// Failed job store selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailedStoreConfig {
    /// In-process memory store.
    #[default]
    Memory,
    /// SQLite database.
    Sqlite {
        /// Connection URL.
        #[serde(default = "default_sqlite_url")]
        url: String,
    },
}
