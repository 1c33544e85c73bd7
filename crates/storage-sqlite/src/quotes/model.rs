//! Database models for quote records.

use chrono::NaiveDate;
use diesel::prelude::*;
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use cotahist_core::errors::{DatabaseError, Error};
use cotahist_core::quotes::QuoteRecord;
use cotahist_core::utils::time_utils::{format_iso_date, parse_iso_date};

/// Bound parameters per inserted row.
pub const QUOTE_COLUMNS: usize = 9;

/// Prices are stored with two fractional digits.
const PRICE_SCALE: u32 = 2;

/// Database model for one quote row.
///
/// Dates are ISO text so lexical order is chronological; amounts are REAL.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::quotes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QuoteDB {
    pub date: String,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: i64,
    pub quantity: i64,
}

fn to_real(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn from_real(column: &str, value: f64) -> Result<Decimal, Error> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(PRICE_SCALE))
        .ok_or_else(|| {
            DatabaseError::Internal(format!("{} holds a non-finite value: {}", column, value))
                .into()
        })
}

impl From<&QuoteRecord> for QuoteDB {
    fn from(record: &QuoteRecord) -> Self {
        Self {
            date: format_iso_date(record.date),
            ticker: record.ticker.clone(),
            open: to_real(record.open),
            high: to_real(record.high),
            low: to_real(record.low),
            close: to_real(record.close),
            volume: to_real(record.volume),
            trade_count: record.trade_count,
            quantity: record.quantity,
        }
    }
}

impl TryFrom<QuoteDB> for QuoteRecord {
    type Error = Error;

    fn try_from(row: QuoteDB) -> Result<Self, Self::Error> {
        let date: NaiveDate = parse_iso_date(&row.date).ok_or_else(|| {
            Error::Database(DatabaseError::Internal(format!(
                "quote {} has an invalid date {}",
                row.ticker, row.date
            )))
        })?;

        Ok(QuoteRecord {
            date,
            open: from_real("open", row.open)?,
            high: from_real("high", row.high)?,
            low: from_real("low", row.low)?,
            close: from_real("close", row.close)?,
            volume: from_real("volume", row.volume)?,
            trade_count: row.trade_count,
            quantity: row.quantity,
            ticker: row.ticker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> QuoteRecord {
        QuoteRecord {
            date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            ticker: "HGLG11".to_string(),
            open: dec!(160.10),
            high: dec!(162.99),
            low: dec!(159.01),
            close: dec!(161.45),
            volume: dec!(12345678.90),
            trade_count: 3120,
            quantity: 76543,
        }
    }

    #[test]
    fn test_stored_row_reads_back_with_two_decimals() {
        let original = record();
        let row = QuoteDB::from(&original);
        assert_eq!(row.date, "2024-03-15");

        let restored = QuoteRecord::try_from(row).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_invalid_stored_date_is_rejected() {
        let mut row = QuoteDB::from(&record());
        row.date = "15/03/2024".to_string();
        assert!(QuoteRecord::try_from(row).is_err());
    }
}
