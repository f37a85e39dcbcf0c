// Migration Runner

use paydesk_core::error::{AppError, Result};
use sqlx::SqlitePool;
use tracing::info;

fn db_err(e: sqlx::Error) -> AppError {
    AppError::Database(e.to_string())
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Check if schema_version table exists
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(db_err)?
            .unwrap_or(0)
    } else {
        0
    };

    info!(version = current_version, "Current schema version");

    if current_version < 1 {
        info!("Applying migration 001: Initial schema");
        apply_migration(pool, include_str!("../migrations/001_initial_schema.sql")).await?;
    }

    info!("All migrations applied successfully");
    Ok(())
}

/// Apply a single migration SQL file
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    // Execute migration in a transaction
    let mut tx = pool.begin().await.map_err(db_err)?;

    // Split by semicolon and execute each statement
    for statement in sql.split(';') {
        // Remove comments and trim
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
    }

    tx.commit().await.map_err(db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        for table in ["payrolls", "employees", "employee_payroll_lines", "audit_logs"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "{table} should start empty");
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, 1);
    }
}
