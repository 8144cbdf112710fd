//! SQLite connection pool with WAL mode.
//!
//! Provides a thread-safe connection pool for SQLite with Write-Ahead Logging (WAL)
//! enabled so reads outside a unit of work do not block on writers.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Create a new connection pool with WAL mode enabled.
///
/// Every unit of work takes the database write lock as its first
/// statement (see `SqliteStore::begin`). `busy_timeout` is what turns a
/// second writer into a queued waiter rather than an immediate
/// `SQLITE_BUSY`, so it must stay longer than any operation deadline a
/// caller is expected to configure.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
///
/// # Returns
/// A connection pool ready for use
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let db_url = format!("sqlite:{}", db_path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        // First start creates the file; migrations fill it in
        .create_if_missing(true)
        // Readers outside a unit of work never wait on the writer
        .journal_mode(SqliteJournalMode::Wal)
        // NORMAL is durable enough under WAL
        .synchronous(SqliteSynchronous::Normal)
        // Assignment rows reference users and pull requests
        .foreign_keys(true)
        // Queue behind the write lock taken in `begin` (see above)
        .busy_timeout(Duration::from_secs(30))
        // Checkpoint every 1000 pages so the WAL file stays small
        .pragma("wal_autocheckpoint", "1000");

    let pool = SqlitePoolOptions::new()
        // Writes are serialized anyway; a few extra connections serve reads
        .max_connections(5)
        // Keep one connection warm
        .min_connections(1)
        // Waiting for a pooled connection
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    // Verify WAL mode is enabled
    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;

    debug_assert!(
        mode.0.to_lowercase() == "wal",
        "WAL mode should be enabled, got: {}",
        mode.0
    );

    Ok(pool)
}

/// Create the pool, retrying transient failures.
///
/// Only used at startup; units of work are never retried.
pub async fn connect_with_retry(
    db_path: &Path,
    attempts: u32,
    delay: Duration,
) -> Result<DbPool, sqlx::Error> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match create_pool(db_path).await {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < attempts => {
                log::warn!(
                    "[db] Failed to connect to {} (attempt {}/{}): {}",
                    db_path.display(),
                    attempt,
                    attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
