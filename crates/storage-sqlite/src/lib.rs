//! SQLite storage implementation for the COTAHIST pipeline.
//!
//! This crate provides all database-related functionality using Diesel ORM with SQLite.
//! It implements the storage traits defined in `cotahist-core` and contains:
//! - Database initialization, connection pooling and migrations
//! - The single writer actor that serializes every write transaction
//! - Repository implementations for quotes and the processed-file ledger
//! - Database-specific model types (with Diesel derives)
//!
//! # Architecture
//!
//! This crate is the only place where Diesel dependencies exist. The core
//! crate is database-agnostic and works with traits.
//!
//! ```text
//!  core (ingest, ledger, cache)
//!                  │  QuoteStore / ProcessedFileStore
//!                  ▼
//!          storage-sqlite (this crate)
//!                  │  pool for reads, writer actor for writes
//!                  ▼
//!            SQLite DB (WAL)
//! ```

pub mod db;
pub mod errors;
pub mod schema;
pub mod utils;

// Repository implementations
pub mod processed_files;
pub mod quotes;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, init, open, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use processed_files::ProcessedFileRepository;
pub use quotes::QuoteRepository;

// Re-export from cotahist-core for convenience
pub use cotahist_core::errors::{DatabaseError, Error, Result};
