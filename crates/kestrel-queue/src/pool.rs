//! SQLite connection pool shared by the SQLite driver and failed job store.

use crate::error::{QueueError, QueueResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Opens a SQLite pool, creating the database file if needed.
///
/// In-memory URLs get a single connection that is never recycled, since every
/// SQLite connection to `:memory:` sees its own database.
pub async fn connect_sqlite(url: &str, max_connections: u32) -> QueueResult<SqlitePool> {
    info!("Connecting to SQLite database...");

    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| QueueError::Configuration(format!("Invalid SQLite URL: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        warn!("Failed to connect to SQLite: {}", e);
        QueueError::Connection(format!("Failed to connect: {}", e))
    })?;

    info!("SQLite connection pool established");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory() {
        let pool = connect_sqlite("sqlite::memory:", 8).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert_eq!(pool.options().get_max_connections(), 1);
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect_sqlite(&url, 2).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = connect_sqlite("sqlite://queue.db?mode=bogus", 1).await;
        assert!(matches!(result, Err(QueueError::Configuration(_))));
    }
}
