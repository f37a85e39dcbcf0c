// SQLite Connection Pool Setup

use paydesk_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Create SQLite connection pool with WAL mode and foreign keys enforced.
///
/// An in-memory database lives only as long as its connection, so it gets a
/// single connection that is never recycled.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url: {}", e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    let in_memory = database_url.contains(":memory:");
    let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory {
        1
    } else {
        max_connections.max(1)
    });
    if in_memory {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    pool_options
        .connect_with(options)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool() {
        let pool = create_pool("sqlite::memory:", 10).await.unwrap();
        assert!(pool.acquire().await.is_ok());

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let result = create_pool("postgres://nope", 1).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
