//! Utility functions for SQLite storage operations.
//!
//! Multi-row `INSERT` statements bind one parameter per column per row, so
//! bulk writes are split into statements that stay under SQLite's limit.

/// Maximum number of bound parameters in one SQLite statement.
///
/// This is the historical `SQLITE_MAX_VARIABLE_NUMBER` default. Newer SQLite
/// builds allow more, but staying at 999 keeps statements portable.
pub const SQLITE_MAX_PARAMS: usize = 999;

/// Rows of `columns` parameters each that fit in one statement.
pub fn rows_per_statement(columns: usize) -> usize {
    (SQLITE_MAX_PARAMS / columns.max(1)).max(1)
}

/// Splits rows into slices that can each be bound in a single statement.
///
/// ```ignore
/// for chunk in chunk_for_sqlite(&rows, QUOTE_COLUMNS) {
///     diesel::insert_or_ignore_into(quotes::table).values(chunk).execute(conn)?;
/// }
/// ```
pub fn chunk_for_sqlite<T>(items: &[T], columns: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(rows_per_statement(columns))
}
