//! SQLite storage implementation for quote records.

mod model;
mod repository;

pub use model::{QuoteDB, QUOTE_COLUMNS};
pub use repository::QuoteRepository;
