//! File ingestion pipeline.
//!
//! ```text
//! ClassifiedFile ─► IngestService ─► ChunkScheduler (rayon pool) ─► RecordParser
//!                        │
//!                        ├─► QuoteStore::delete_range / upsert_batch
//!                        └─► ProcessedFileLedger::register
//! ```
//!
//! - [`chunking`] - Pre-filtered chunking and parallel parsing
//! - [`service`] - Per-file and batch orchestration
//! - [`report`] - Per-file and batch outcomes
//! - [`fetcher`] - Download collaborator interface

pub mod chunking;
pub mod fetcher;
pub mod report;
pub mod service;


pub use chunking::{ChunkOutcome, ChunkScheduler};
pub use fetcher::Fetcher;
pub use report::{BatchReport, DatabaseOverview, FileFailure, FileReport, FileStatus};
pub use service::{IngestService, PendingFile};
