//! Query record persistence
//!
//! Rows of the `queries` table. Parameters are stored as serialized JSON
//! text and only parsed at the record boundary.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::Result;

const QUERY_COLUMNS: &str = "key, query, parameters, result_file, status, timestamp, \
                             is_empty, is_finished, num_rows, key_parent, type";

/// One row of the `queries` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct QueryRow {
    pub key: String,
    pub query: String,
    /// Serialized parameter document
    pub parameters: String,
    /// Reserved file name, empty until reserved
    pub result_file: String,
    pub status: String,
    /// Creation time, epoch seconds
    pub timestamp: i64,
    pub is_empty: bool,
    pub is_finished: bool,
    pub num_rows: i64,
    /// Empty for root searches
    pub key_parent: String,
    /// `search` for root searches, the post-processor type for analyses
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub query_type: String,
}

/// Load a record by key
pub async fn fetch_by_key(pool: &SqlitePool, key: &str) -> Result<Option<QueryRow>> {
    let row = sqlx::query_as::<_, QueryRow>(&format!(
        "SELECT {} FROM queries WHERE key = ?",
        QUERY_COLUMNS
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Load a record by key, requiring the stored query text to match as well
pub async fn fetch_by_key_and_query(
    pool: &SqlitePool,
    key: &str,
    query: &str,
) -> Result<Option<QueryRow>> {
    let row = sqlx::query_as::<_, QueryRow>(&format!(
        "SELECT {} FROM queries WHERE key = ? AND query = ?",
        QUERY_COLUMNS
    ))
    .bind(key)
    .bind(query)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Insert `row` unless a record with the same key exists, then load it
///
/// Runs as one transaction. Returns the stored row (which is the existing
/// one when the key was already taken) and whether this call inserted it.
pub async fn insert_or_fetch(pool: &SqlitePool, row: &QueryRow) -> Result<(QueryRow, bool)> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO queries (
            key, query, parameters, result_file, status, timestamp,
            is_empty, is_finished, num_rows, key_parent, type
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(key) DO NOTHING
        "#,
    )
    .bind(&row.key)
    .bind(&row.query)
    .bind(&row.parameters)
    .bind(&row.result_file)
    .bind(&row.status)
    .bind(row.timestamp)
    .bind(row.is_empty)
    .bind(row.is_finished)
    .bind(row.num_rows)
    .bind(&row.key_parent)
    .bind(&row.query_type)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        > 0;

    let stored = sqlx::query_as::<_, QueryRow>(&format!(
        "SELECT {} FROM queries WHERE key = ?",
        QUERY_COLUMNS
    ))
    .bind(&row.key)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    debug!(key = %row.key, inserted, "Resolved query row");
    Ok((stored, inserted))
}

/// Overwrite the status text; returns the number of affected rows
pub async fn update_status(pool: &SqlitePool, key: &str, status: &str) -> Result<u64> {
    let affected = sqlx::query("UPDATE queries SET status = ? WHERE key = ?")
        .bind(status)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected)
}

/// Mark a record finished with its row count
///
/// Only matches unfinished rows, so a second finisher affects nothing.
pub async fn mark_finished(pool: &SqlitePool, key: &str, num_rows: i64) -> Result<u64> {
    let affected = sqlx::query(
        "UPDATE queries SET is_finished = 1, num_rows = ? WHERE key = ? AND is_finished = 0",
    )
    .bind(num_rows)
    .bind(key)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected)
}

/// Flag a record as having produced no results
pub async fn mark_empty(pool: &SqlitePool, key: &str) -> Result<u64> {
    let affected = sqlx::query("UPDATE queries SET is_empty = 1 WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected)
}

/// Persist the reserved result file name
pub async fn set_result_file(pool: &SqlitePool, key: &str, result_file: &str) -> Result<u64> {
    let affected = sqlx::query("UPDATE queries SET result_file = ? WHERE key = ?")
        .bind(result_file)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected)
}

/// Replace the serialized parameter document
pub async fn set_parameters(pool: &SqlitePool, key: &str, parameters: &str) -> Result<u64> {
    let affected = sqlx::query("UPDATE queries SET parameters = ? WHERE key = ?")
        .bind(parameters)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected)
}

/// Whether any record has reserved `result_file`
pub async fn result_file_taken(pool: &SqlitePool, result_file: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queries WHERE result_file = ?")
        .bind(result_file)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

/// All direct children of a record, oldest first
pub async fn fetch_children(pool: &SqlitePool, key_parent: &str) -> Result<Vec<QueryRow>> {
    let rows = sqlx::query_as::<_, QueryRow>(&format!(
        "SELECT {} FROM queries WHERE key_parent = ? ORDER BY timestamp ASC, rowid ASC",
        QUERY_COLUMNS
    ))
    .bind(key_parent)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// Matches on the `user` parameter without failing on malformed documents
const USER_FILTER: &str =
    "(? IS NULL OR (CASE WHEN json_valid(parameters) THEN json_extract(parameters, '$.user') END) = ?)";

/// Root searches, newest first, optionally limited to one user
pub async fn list_root_queries(
    pool: &SqlitePool,
    user: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueryRow>> {
    let rows = sqlx::query_as::<_, QueryRow>(&format!(
        "SELECT {} FROM queries WHERE key_parent = '' AND {} \
         ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?",
        QUERY_COLUMNS, USER_FILTER
    ))
    .bind(user)
    .bind(user)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Number of root searches, optionally limited to one user
pub async fn count_root_queries(pool: &SqlitePool, user: Option<&str>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM queries WHERE key_parent = '' AND {}",
        USER_FILTER
    ))
    .bind(user)
    .bind(user)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
