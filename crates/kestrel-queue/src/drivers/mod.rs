//! Queue driver implementations.

pub mod memory;
pub mod redis;
pub mod sqlite;
pub mod sync;

pub use memory::MemoryDriver;
pub use self::redis::RedisDriver;
pub use sqlite::SqliteDriver;
pub use sync::SyncDriver;

use crate::clock::Clock;
use crate::config::{DriverConfig, FailedStoreConfig, QueueConfig};
use crate::definition::JobDefaults;
use crate::error::QueueResult;
use crate::failed::{FailedJobRepository, MemoryFailedJobRepository, SqliteFailedJobRepository};
use crate::queue::QueueDriver;
use crate::registry::JobRegistry;
use std::sync::Arc;
use tracing::info;

/// Builds the driver selected by configuration.
///
/// The registry is only used by the sync driver, which runs jobs inline.
pub async fn connect_driver(
    config: &QueueConfig,
    registry: Arc<JobRegistry>,
    clock: Arc<dyn Clock>,
) -> QueueResult<Arc<dyn QueueDriver>> {
    let reservation_timeout = config.reservation_timeout();

    let driver: Arc<dyn QueueDriver> = match &config.driver {
        DriverConfig::Memory => {
            info!("Using memory queue driver");
            Arc::new(MemoryDriver::new(clock, reservation_timeout))
        }
        DriverConfig::Sync => {
            info!("Using sync queue driver");
            let defaults = JobDefaults::from_config(config)?;
            Arc::new(SyncDriver::new(registry, defaults).with_clock(clock))
        }
        DriverConfig::Sqlite { url, pool_size } => {
            info!("Using SQLite queue driver");
            Arc::new(
                SqliteDriver::connect(url, *pool_size, reservation_timeout)
                    .await?
                    .with_clock(clock),
            )
        }
        DriverConfig::Redis(redis) => {
            info!("Using Redis queue driver");
            Arc::new(
                RedisDriver::connect(redis, reservation_timeout)
                    .await?
                    .with_clock(clock),
            )
        }
    };

    Ok(driver)
}

/// Builds the failed job store selected by configuration.
pub async fn connect_failed_store(config: &QueueConfig) -> QueueResult<Arc<dyn FailedJobRepository>> {
    let repository: Arc<dyn FailedJobRepository> = match &config.failed {
        FailedStoreConfig::Memory => Arc::new(MemoryFailedJobRepository::new()),
        FailedStoreConfig::Sqlite { url } => Arc::new(SqliteFailedJobRepository::connect(url).await?),
    };
    Ok(repository)
}
