//! Database layer for SQLite storage.
//!
//! This module handles:
//! - Connection pool management with WAL mode
//! - Schema migrations
//! - The SQLite implementation of the data-access contract

pub mod pool;
pub mod store;

pub use store::SqliteStore;

use std::path::Path;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::repository::selection::selector_for_seed;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Ordered schema migrations, applied once each.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Initialize the database: create the file if needed and run migrations.
///
/// Connection failures are retried `connect_attempts` times.
pub async fn initialize(config: &EngineConfig) -> Result<pool::DbPool, DbError> {
    let db_path = config.database_path.as_path();
    ensure_parent_dir(db_path)?;

    let pool = pool::connect_with_retry(
        db_path,
        config.connect_attempts,
        config.connect_retry_delay(),
    )
    .await?;

    run_migrations(&pool).await?;
    log::info!("[db] Database ready at {}", db_path.display());

    Ok(pool)
}

/// Initialize the database and wrap it in a store using the configured
/// reviewer draw.
pub async fn open_store(config: &EngineConfig) -> Result<SqliteStore, DbError> {
    let pool = initialize(config).await?;
    Ok(SqliteStore::with_selector(
        pool,
        selector_for_seed(config.candidate_seed),
    ))
}

fn ensure_parent_dir(db_path: &Path) -> Result<(), DbError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Migration(format!("Failed to create database directory: {}", e))
            })?;
        }
    }
    Ok(())
}

/// Run all pending database migrations.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for &(name, sql) in MIGRATIONS {
        let applied: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        if applied.is_some() {
            continue;
        }

        // Schema and bookkeeping land together or not at all
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;
        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        log::info!("[db] Applied migration {}", name);
    }

    Ok(())
}
