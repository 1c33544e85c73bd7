//! Quote storage trait.
//!
//! This trait abstracts the persistence layer for quote records so the
//! ingestion pipeline can be tested with in-memory fakes.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::model::{QuoteRecord, QuoteStatistics};
use crate::errors::Result;

/// Storage interface for the quote table.
///
/// Implementations own the table exclusively. Writes are idempotent on the
/// natural key `(date, ticker)` and invalidate every cached read derived from
/// the table.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts records, ignoring those whose key already exists.
    ///
    /// Records are written in adaptively sized sub-batches, each committed on
    /// its own, so a failure partway through keeps earlier batches. Lock
    /// contention is retried with a bounded policy before it is propagated.
    ///
    /// # Returns
    ///
    /// The number of rows actually inserted.
    async fn upsert_batch(&self, records: &[QuoteRecord]) -> Result<usize>;

    /// Deletes every record dated within `[start, end]`.
    ///
    /// Used before re-ingesting a file whose archive changed, since
    /// insert-or-ignore alone cannot apply corrections.
    ///
    /// # Returns
    ///
    /// The number of rows removed.
    async fn delete_range(&self, start: NaiveDate, end: NaiveDate) -> Result<usize>;

    // =========================================================================
    // Queries
    // =========================================================================

    /// Most recent trade date in the table, if any.
    fn last_date(&self) -> Result<Option<NaiveDate>>;

    /// Record count, distinct tickers and date bounds.
    fn statistics(&self) -> Result<QuoteStatistics>;

    /// Distinct tickers in alphabetical order.
    fn list_tickers(&self) -> Result<Vec<String>>;

    /// Records of one ticker, optionally bounded by date, ordered by date.
    fn quotes_for_ticker(
        &self,
        ticker: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<QuoteRecord>>;
}
