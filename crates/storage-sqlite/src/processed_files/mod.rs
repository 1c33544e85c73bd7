//! SQLite storage implementation for the processed-file ledger.

mod model;
mod repository;

pub use model::ProcessedFileDB;
pub use repository::ProcessedFileRepository;
