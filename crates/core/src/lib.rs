//! COTAHIST Core - parsing, classification and ingestion of B3 quote files.
//!
//! This crate contains the ingestion pipeline for the exchange's fixed-width
//! historical quote files. It is database-agnostic and defines the storage
//! traits that are implemented by the `storage-sqlite` crate.

pub mod cache;
pub mod config;
pub mod errors;
pub mod files;
pub mod ingest;
pub mod quotes;
pub mod utils;

pub use cache::{Cache, CachePolicy, CacheStats};
pub use config::IngestConfig;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
