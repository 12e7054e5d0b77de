//! Database initialization
//!
//! Opens (or creates) the SQLite database and makes sure every table the
//! query registry relies on exists. All statements are idempotent, so this
//! runs on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers alongside the single writer per record
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_queries_table(&pool).await?;
    create_jobs_table(&pool).await?;

    Ok(pool)
}

/// Create the queries table
///
/// One row per root search or chained analysis. `key` is the content-derived
/// identifier; `result_file` is unique once reserved.
pub async fn create_queries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queries (
            key TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            parameters TEXT NOT NULL DEFAULT '{}',
            result_file TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            timestamp INTEGER NOT NULL,
            is_empty INTEGER NOT NULL DEFAULT 0,
            is_finished INTEGER NOT NULL DEFAULT 0,
            num_rows INTEGER NOT NULL DEFAULT 0,
            key_parent TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL DEFAULT 'search'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_queries_result_file
        ON queries(result_file)
        WHERE result_file != ''
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queries_parent ON queries(key_parent, timestamp)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the jobs table
///
/// Each `(jobtype, remote_id)` pair may be queued at most once.
pub async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            jobtype TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            claimed INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            UNIQUE(jobtype, remote_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
