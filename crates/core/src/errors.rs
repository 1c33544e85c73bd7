//! Core error types for the COTAHIST ingestion pipeline.
//!
//! This module defines database-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the ingestion pipeline.
///
/// Per-line parse problems are never represented here: a malformed or
/// irrelevant line is skipped by the parser. Chunk worker failures are counted
/// by the scheduler instead of being returned as errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("File classification failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Archive operation failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Returns true when the error is lock contention on the relational store.
    pub fn is_locked(&self) -> bool {
        matches!(self, Error::Database(DatabaseError::Locked(_)))
    }
}

/// Database-agnostic error type for storage operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert storage-specific errors (Diesel, SQLite, etc.) into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Another writer holds the database lock. Retried by the lock-retry policy.
    #[error("Database is locked: {0}")]
    Locked(String),

    /// A database transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Errors raised while classifying a quote file by its name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Unrecognized file name format: {0}")]
    UnrecognizedFormat(String),

    #[error("File name {0} encodes an invalid calendar date")]
    InvalidDate(String),
}

/// Errors raised while unpacking source archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Corrupt or empty archive. Never retried.
    #[error("Bad archive {path}: {reason}")]
    BadArchive { path: String, reason: String },

    /// Transient failure while reading or writing archive members.
    #[error("Failed to extract {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// The archive unpacked fine but held no quote text file.
    #[error("Archive {0} does not contain a quote text file")]
    MissingText(String),
}
