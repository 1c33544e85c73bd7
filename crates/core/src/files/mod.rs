//! Source file handling.
//!
//! - [`classifier`] - Name-based classification and directory discovery
//! - [`archive`] - Archive/text siblings, extraction and hashing
//! - [`ledger`] - Record of ingested archives and change detection
//! - [`model`] - Classified files and ledger rows

pub mod archive;
pub mod classifier;
pub mod ledger;
pub mod model;

pub use archive::{extract_archive, extract_text, hash_file, ArchivePair};
pub use classifier::{archive_file_name, classify, discover_files};
pub use ledger::{ProcessedFileLedger, ProcessedFileStore};
pub use model::{ClassifiedFile, FileFormat, KindSummary, LedgerStatus, PeriodKind, ProcessedFile};
