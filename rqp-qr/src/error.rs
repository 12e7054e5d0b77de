//! Error types for rqp-qr
//!
//! Lifecycle violations (`AlreadyFinished`) and lookup failures (`NotFound`)
//! are always surfaced to the caller. Store, filesystem and serialization
//! failures are propagated unchanged; nothing here retries.

use thiserror::Error;

/// Main error type for the query registry
#[derive(Error, Debug)]
pub enum Error {
    /// No query record matches the given key
    #[error("Query not found: {0}")]
    NotFound(String),

    /// Not enough (or inconsistent) input to resolve or create a record
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Attempt to finish, or reserve a result file for, a finished record
    #[error("Query {0} is already finished")]
    AlreadyFinished(String),

    /// The key is held by a record with different query text or parent
    #[error("Key {0} belongs to a different query")]
    KeyConflict(String),

    /// A job for this (job type, remote id) pair is already queued
    #[error("Job {jobtype} for {remote_id} already exists")]
    JobAlreadyExists { jobtype: String, remote_id: String },

    /// Post-processor catalog could not be loaded
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Result file writing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Parameter document (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// rqp-common error
    #[error("Common error: {0}")]
    Common(#[from] rqp_common::Error),
}

/// Convenience Result type using the rqp-qr Error
pub type Result<T> = std::result::Result<T, Error>;
