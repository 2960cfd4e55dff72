//! Redis-backed queue driver.

mod driver;
mod scripts;

pub use driver::RedisDriver;

use crate::config::RedisConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::JobPriority;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> QueueResult<Pool> {
    info!("Creating Redis connection pool for queue driver...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| QueueError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Width of one priority band in a ready-set score.
pub(crate) const PRIORITY_BAND: f64 = 1e15;

/// Score of a job in its queue's ready set.
///
/// Lower scores pop first: higher priorities get lower bands, and within a
/// band the enqueue sequence keeps FIFO order.
pub fn ready_score(priority: JobPriority, seq: u64) -> f64 {
    let band = f64::from(JobPriority::HIGHEST.value() - priority.value());
    band * PRIORITY_BAND + seq as f64
}

/// Redis key builder for the queue driver.
///
/// The Lua scripts build the same keys from the prefix.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Prefix passed to the scripts.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Job record (hash).
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Jobs available now (sorted set by priority band + sequence).
    pub fn ready(&self, queue_name: &str) -> String {
        format!("{}:queue:{}:ready", self.prefix, queue_name)
    }

    /// Jobs waiting for their delay (sorted set by availability time).
    pub fn delayed(&self, queue_name: &str) -> String {
        format!("{}:queue:{}:delayed", self.prefix, queue_name)
    }

    /// Leased jobs (sorted set by lease expiry).
    pub fn reserved(&self, queue_name: &str) -> String {
        format!("{}:queue:{}:reserved", self.prefix, queue_name)
    }

    /// Registered queue names (set).
    pub fn queues(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    /// Enqueue sequence counter.
    pub fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("kestrel:queue")
    }
}
