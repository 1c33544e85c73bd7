//! Quote records: parsing, storage contract and batching policy.
//!
//! - [`model`] - `QuoteRecord` and aggregate statistics
//! - [`parser`] - Fixed-width COTAHIST line parser
//! - [`store`] - Storage trait implemented by the SQLite crate
//! - [`batching`] - Adaptive sub-batch sizing for bulk inserts

pub mod batching;
pub mod model;
pub mod parser;
pub mod store;

pub use batching::BatchSizing;
pub use model::{QuoteRecord, QuoteStatistics};
pub use parser::RecordParser;
pub use store::QuoteStore;
