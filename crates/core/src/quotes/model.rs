//! Quote domain models.
//!
//! This module contains the data structures for daily quote records extracted
//! from COTAHIST files and the aggregates computed over them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::utils::time_utils::format_iso_date;

// =============================================================================
// Quote Record
// =============================================================================

/// One traded instrument on one trading day.
///
/// The natural key is `(date, ticker)`. Records are never mutated after they
/// are persisted; corrections arrive by deleting a date range and ingesting
/// the file again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Total traded value, in the same fixed-point unit as prices.
    pub volume: Decimal,
    pub trade_count: i64,
    pub quantity: i64,
}

impl QuoteRecord {
    /// Natural key of the record.
    pub fn key(&self) -> (NaiveDate, &str) {
        (self.date, self.ticker.as_str())
    }

    /// Trade date as an ISO `YYYY-MM-DD` string.
    pub fn date_iso(&self) -> String {
        format_iso_date(self.date)
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Aggregate statistics over the quote table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteStatistics {
    pub total_records: i64,
    pub total_tickers: i64,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}
