//! Fixed-width parser for COTAHIST quote records.
//!
//! Field positions follow the published B3 layout (0-based, half-open byte
//! ranges). Only record type `01` with the configured instrument-class code
//! yields a record; everything else is skipped.
//!
//! Parsing works on raw bytes because the files are ISO-8859-1 encoded and the
//! offsets are byte offsets.

use chrono::NaiveDate;
use encoding_rs::WINDOWS_1252;
use log::warn;
use rust_decimal::Decimal;

use super::model::QuoteRecord;
use crate::config::DEFAULT_TARGET_CLASS_CODE;

/// Minimum length of a quote line, excluding the line terminator.
pub const MIN_LINE_LENGTH: usize = 245;

/// Record type code of a quote record.
pub const QUOTE_RECORD_TYPE: &[u8] = b"01";

/// Byte range of one field in the fixed-width layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub start: usize,
    pub end: usize,
}

impl FieldSpan {
    const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    fn slice<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[self.start..self.end]
    }
}

/// Published layout of the quote record (type `01`).
pub mod layout {
    use super::FieldSpan;

    pub const RECORD_TYPE: FieldSpan = FieldSpan::new(0, 2);
    pub const TRADE_DATE: FieldSpan = FieldSpan::new(2, 10);
    pub const CLASS_CODE: FieldSpan = FieldSpan::new(10, 12);
    pub const TICKER: FieldSpan = FieldSpan::new(12, 24);
    pub const MARKET_TYPE: FieldSpan = FieldSpan::new(24, 27);
    pub const COMPANY: FieldSpan = FieldSpan::new(27, 39);
    pub const SPECIFICATION: FieldSpan = FieldSpan::new(39, 49);
    pub const OPEN: FieldSpan = FieldSpan::new(56, 69);
    pub const HIGH: FieldSpan = FieldSpan::new(69, 82);
    pub const LOW: FieldSpan = FieldSpan::new(82, 95);
    pub const AVERAGE: FieldSpan = FieldSpan::new(95, 108);
    pub const CLOSE: FieldSpan = FieldSpan::new(108, 121);
    pub const BEST_BID: FieldSpan = FieldSpan::new(121, 134);
    pub const BEST_ASK: FieldSpan = FieldSpan::new(134, 147);
    pub const TRADE_COUNT: FieldSpan = FieldSpan::new(147, 152);
    pub const QUANTITY: FieldSpan = FieldSpan::new(152, 170);
    pub const VOLUME: FieldSpan = FieldSpan::new(170, 188);
}

/// Why a candidate line could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedField {
    Date(String),
    Monetary(&'static str, String),
    Integer(&'static str, String),
}

impl std::fmt::Display for MalformedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedField::Date(raw) => write!(f, "invalid trade date '{}'", raw),
            MalformedField::Monetary(field, raw) => write!(f, "invalid {} value '{}'", field, raw),
            MalformedField::Integer(field, raw) => write!(f, "invalid {} count '{}'", field, raw),
        }
    }
}

/// Stateless parser for quote lines of one instrument class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordParser {
    class_code: Vec<u8>,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_CLASS_CODE)
    }
}

impl RecordParser {
    pub fn new(class_code: &str) -> Self {
        Self {
            class_code: class_code.trim().as_bytes().to_vec(),
        }
    }

    /// Cheap filter on length, record type and class code.
    ///
    /// Used while streaming so irrelevant lines are never buffered.
    pub fn is_candidate(&self, line: &[u8]) -> bool {
        line.len() >= MIN_LINE_LENGTH
            && layout::RECORD_TYPE.slice(line) == QUOTE_RECORD_TYPE
            && layout::CLASS_CODE.slice(line).trim_ascii() == self.class_code.as_slice()
    }

    /// Parses a line, returning `None` for lines that are not in scope or malformed.
    ///
    /// Malformed lines are logged and skipped.
    pub fn parse(&self, line: &[u8]) -> Option<QuoteRecord> {
        let line = strip_line_ending(line);
        if !self.is_candidate(line) {
            return None;
        }
        match parse_fields(line) {
            Ok(record) => Some(record),
            Err(reason) => {
                warn!(
                    "Skipping malformed quote line for {}: {}",
                    decode_text(layout::TICKER.slice(line)),
                    reason
                );
                None
            }
        }
    }

    pub fn parse_line(&self, line: &str) -> Option<QuoteRecord> {
        self.parse(line.as_bytes())
    }
}

fn parse_fields(line: &[u8]) -> Result<QuoteRecord, MalformedField> {
    let raw_date = decode_text(layout::TRADE_DATE.slice(line));
    let date = NaiveDate::parse_from_str(&raw_date, "%Y%m%d")
        .map_err(|_| MalformedField::Date(raw_date.clone()))?;

    Ok(QuoteRecord {
        date,
        ticker: decode_text(layout::TICKER.slice(line)),
        open: monetary_field(line, layout::OPEN, "open")?,
        high: monetary_field(line, layout::HIGH, "high")?,
        low: monetary_field(line, layout::LOW, "low")?,
        close: monetary_field(line, layout::CLOSE, "close")?,
        volume: monetary_field(line, layout::VOLUME, "volume")?,
        trade_count: integer_field(line, layout::TRADE_COUNT, "trade")?,
        quantity: integer_field(line, layout::QUANTITY, "quantity")?,
    })
}

fn monetary_field(line: &[u8], span: FieldSpan, name: &'static str) -> Result<Decimal, MalformedField> {
    parse_monetary(span.slice(line))
        .ok_or_else(|| MalformedField::Monetary(name, decode_text(span.slice(line))))
}

fn integer_field(line: &[u8], span: FieldSpan, name: &'static str) -> Result<i64, MalformedField> {
    parse_integer(span.slice(line))
        .ok_or_else(|| MalformedField::Integer(name, decode_text(span.slice(line))))
}

/// Parses a fixed-point field with two implicit decimals.
///
/// `"0000000001234"` is 12.34, `"5"` is 0.05 and blanks are zero. Returns
/// `None` when the field holds anything other than digits.
pub fn parse_monetary(raw: &[u8]) -> Option<Decimal> {
    let digits = raw.trim_ascii();
    let significant = match digits.iter().position(|b| *b != b'0') {
        Some(idx) => &digits[idx..],
        None => return Some(Decimal::ZERO),
    };
    let cents = parse_digits(significant)?;
    Decimal::try_from_i128_with_scale(cents, 2).ok()
}

/// Parses an unsigned integer field; blanks are zero.
pub fn parse_integer(raw: &[u8]) -> Option<i64> {
    let digits = raw.trim_ascii();
    if digits.is_empty() {
        return Some(0);
    }
    i64::try_from(parse_digits(digits)?).ok()
}

fn parse_digits(digits: &[u8]) -> Option<i128> {
    if digits.is_empty() || digits.len() > 27 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(
        digits
            .iter()
            .fold(0i128, |acc, b| acc * 10 + i128::from(b - b'0')),
    )
}

fn decode_text(raw: &[u8]) -> String {
    let (text, _, _) = WINDOWS_1252.decode(raw);
    text.trim().to_string()
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
