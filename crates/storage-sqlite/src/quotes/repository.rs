use async_trait::async_trait;
use chrono::NaiveDate;
use diesel::dsl::{count_distinct, max, min};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info, warn};
use std::sync::Arc;

use super::model::{QuoteDB, QUOTE_COLUMNS};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::quotes::dsl as quotes_dsl;
use crate::utils::chunk_for_sqlite;
use cotahist_core::cache::{Cache, QUOTES_LAST_DATE, QUOTES_LIST, QUOTES_STATS};
use cotahist_core::quotes::{BatchSizing, QuoteRecord, QuoteStatistics, QuoteStore};
use cotahist_core::utils::retry::{retry_on_lock, LockRetryPolicy, Timed};
use cotahist_core::utils::time_utils::{format_iso_date, parse_iso_date};
use cotahist_core::{IngestConfig, Result};

pub struct QuoteRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    cache: Arc<Cache>,
    batch_sizing: BatchSizing,
    lock_retry: LockRetryPolicy,
}

impl QuoteRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle, cache: Arc<Cache>) -> Self {
        Self {
            pool,
            writer,
            cache,
            batch_sizing: BatchSizing::default(),
            lock_retry: LockRetryPolicy::default(),
        }
    }

    /// Repository using the batch sizing and lock retry from `config`.
    pub fn from_config(
        pool: Arc<DbPool>,
        writer: WriteHandle,
        cache: Arc<Cache>,
        config: &IngestConfig,
    ) -> Self {
        Self::new(pool, writer, cache).with_policies(config.batch_sizing, config.lock_retry)
    }

    pub fn with_policies(mut self, batch_sizing: BatchSizing, lock_retry: LockRetryPolicy) -> Self {
        self.batch_sizing = batch_sizing;
        self.lock_retry = lock_retry;
        self
    }

    /// Drops every cached read derived from the quote table.
    fn invalidate_reads(&self) {
        self.cache.invalidate(QUOTES_LAST_DATE, None);
        self.cache.invalidate(QUOTES_STATS, None);
        self.cache.invalidate(QUOTES_LIST, None);
    }

    async fn insert_sub_batch(&self, rows: Arc<Vec<QuoteDB>>) -> Result<usize> {
        retry_on_lock(self.lock_retry, "upsert_batch", || {
            let rows = Arc::clone(&rows);
            let writer = self.writer.clone();
            async move { writer.exec(move |conn| insert_rows(conn, &rows)).await }
        })
        .await
    }
}

/// Inserts rows, skipping existing keys, in statements that respect the parameter limit.
fn insert_rows(conn: &mut SqliteConnection, rows: &[QuoteDB]) -> Result<usize> {
    let mut inserted = 0;
    for chunk in chunk_for_sqlite(rows, QUOTE_COLUMNS) {
        inserted += diesel::insert_or_ignore_into(quotes_dsl::quotes)
            .values(chunk)
            .execute(conn)
            .map_err(StorageError::QueryFailed)?;
    }
    Ok(inserted)
}

fn parse_stored_date(value: Option<String>) -> Option<NaiveDate> {
    value.as_deref().and_then(parse_iso_date)
}

// =============================================================================
// QuoteStore Implementation
// =============================================================================

#[async_trait]
impl QuoteStore for QuoteRepository {
    // =========================================================================
    // Mutations
    // =========================================================================

    async fn upsert_batch(&self, records: &[QuoteRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let _timed = Timed::start("upsert_batch");

        let batch_size = self.batch_sizing.batch_size(records.len());
        let rows: Vec<QuoteDB> = records.iter().map(QuoteDB::from).collect();
        let total_batches = rows.len().div_ceil(batch_size);
        debug!(
            "Inserting {} records in {} sub-batches of up to {}",
            rows.len(),
            total_batches,
            batch_size
        );

        let mut inserted = 0;
        let mut committed_batches = 0;
        for (index, batch) in rows.chunks(batch_size).enumerate() {
            match self.insert_sub_batch(Arc::new(batch.to_vec())).await {
                Ok(count) => {
                    inserted += count;
                    committed_batches += 1;
                }
                Err(e) => {
                    warn!(
                        "Sub-batch {}/{} failed after {} committed: {}",
                        index + 1,
                        total_batches,
                        committed_batches,
                        e
                    );
                    if committed_batches > 0 {
                        self.invalidate_reads();
                    }
                    return Err(e);
                }
            }
        }

        self.invalidate_reads();
        info!(
            "Inserted {} of {} records ({} already present)",
            inserted,
            records.len(),
            records.len() - inserted
        );
        Ok(inserted)
    }

    async fn delete_range(&self, start: NaiveDate, end: NaiveDate) -> Result<usize> {
        let _timed = Timed::start("delete_range");
        let start_iso = format_iso_date(start);
        let end_iso = format_iso_date(end);

        let removed = retry_on_lock(self.lock_retry, "delete_range", || {
            let writer = self.writer.clone();
            let (start_iso, end_iso) = (start_iso.clone(), end_iso.clone());
            async move {
                writer
                    .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                        let removed = diesel::delete(
                            quotes_dsl::quotes.filter(quotes_dsl::date.between(start_iso, end_iso)),
                        )
                        .execute(conn)
                        .map_err(StorageError::QueryFailed)?;
                        Ok(removed)
                    })
                    .await
            }
        })
        .await?;

        self.invalidate_reads();
        info!("Deleted {} quotes between {} and {}", removed, start, end);
        Ok(removed)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn last_date(&self) -> Result<Option<NaiveDate>> {
        self.cache.get_or_compute(QUOTES_LAST_DATE, "max", || {
            let mut conn = get_connection(&self.pool)?;
            let latest = quotes_dsl::quotes
                .select(max(quotes_dsl::date))
                .first::<Option<String>>(&mut conn)
                .into_core()?;
            Ok(parse_stored_date(latest))
        })
    }

    fn statistics(&self) -> Result<QuoteStatistics> {
        self.cache.get_or_compute(QUOTES_STATS, "summary", || {
            let _timed = Timed::start("quote statistics");
            let mut conn = get_connection(&self.pool)?;

            let total_records = quotes_dsl::quotes
                .count()
                .get_result::<i64>(&mut conn)
                .into_core()?;
            let total_tickers = quotes_dsl::quotes
                .select(count_distinct(quotes_dsl::ticker))
                .first::<i64>(&mut conn)
                .into_core()?;
            let (min_date, max_date) = quotes_dsl::quotes
                .select((min(quotes_dsl::date), max(quotes_dsl::date)))
                .first::<(Option<String>, Option<String>)>(&mut conn)
                .into_core()?;

            Ok(QuoteStatistics {
                total_records,
                total_tickers,
                min_date: parse_stored_date(min_date),
                max_date: parse_stored_date(max_date),
            })
        })
    }

    fn list_tickers(&self) -> Result<Vec<String>> {
        self.cache.get_or_compute(QUOTES_LIST, "tickers", || {
            let mut conn = get_connection(&self.pool)?;
            quotes_dsl::quotes
                .select(quotes_dsl::ticker)
                .distinct()
                .order(quotes_dsl::ticker.asc())
                .load::<String>(&mut conn)
                .into_core()
        })
    }

    fn quotes_for_ticker(
        &self,
        ticker: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<QuoteRecord>> {
        let _timed = Timed::start("quotes_for_ticker");
        let mut conn = get_connection(&self.pool)?;
        let mut query = quotes_dsl::quotes
            .filter(quotes_dsl::ticker.eq(ticker))
            .into_boxed();
        if let Some(start) = start {
            query = query.filter(quotes_dsl::date.ge(format_iso_date(start)));
        }
        if let Some(end) = end {
            query = query.filter(quotes_dsl::date.le(format_iso_date(end)));
        }

        let rows = query
            .order(quotes_dsl::date.asc())
            .select(QuoteDB::as_select())
            .load::<QuoteDB>(&mut conn)
            .into_core()?;
        rows.into_iter().map(QuoteRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use cotahist_core::CachePolicy;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        pool: Arc<DbPool>,
        repo: QuoteRepository,
    }

    fn fixture_with(batch_sizing: BatchSizing) -> Fixture {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("quotes.db");
        let (pool, writer) = db::open(db_path.to_str().unwrap()).unwrap();
        let cache = Arc::new(Cache::with_standard_policies(CachePolicy::default()));
        let retry = LockRetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(1),
        };
        Fixture {
            _dir: dir,
            pool: pool.clone(),
            repo: QuoteRepository::new(pool, writer, cache).with_policies(batch_sizing, retry),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(BatchSizing::default())
    }

    fn quote(date: (i32, u32, u32), ticker: &str, close: Decimal) -> QuoteRecord {
        QuoteRecord {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            ticker: ticker.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1000.00),
            trade_count: 10,
            quantity: 100,
        }
    }

    #[tokio::test]
    async fn test_upsert_ignores_existing_keys() {
        let f = fixture();
        let first = vec![
            quote((2024, 1, 2), "HGLG11", dec!(160.00)),
            quote((2024, 1, 2), "KNRI11", dec!(140.00)),
        ];
        assert_eq!(f.repo.upsert_batch(&first).await.unwrap(), 2);

        let second = vec![
            quote((2024, 1, 2), "HGLG11", dec!(999.99)),
            quote((2024, 1, 3), "HGLG11", dec!(161.00)),
        ];
        assert_eq!(f.repo.upsert_batch(&second).await.unwrap(), 1);

        let stored = f.repo.quotes_for_ticker("HGLG11", None, None).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].close, dec!(160.00));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let f = fixture();
        assert_eq!(f.repo.upsert_batch(&[]).await.unwrap(), 0);
        assert_eq!(f.repo.statistics().unwrap(), QuoteStatistics::default());
    }

    #[tokio::test]
    async fn test_sub_batches_cover_every_record() {
        let sizing = BatchSizing {
            small: 7,
            medium: 7,
            large: 7,
            max_batch_bytes: 700,
            bytes_per_record: None,
        };
        let f = fixture_with(sizing);
        let records: Vec<QuoteRecord> = (0..250)
            .map(|i| quote((2024, 2, 1), &format!("FII{:03}", i), dec!(10.00)))
            .collect();

        assert_eq!(f.repo.upsert_batch(&records).await.unwrap(), 250);
        assert_eq!(f.repo.statistics().unwrap().total_records, 250);
    }

    #[tokio::test]
    async fn test_failed_sub_batch_keeps_earlier_commits() {
        let sizing = BatchSizing {
            small: 7,
            medium: 7,
            large: 7,
            max_batch_bytes: 700,
            bytes_per_record: None,
        };
        let f = fixture_with(sizing);
        let mut conn = get_connection(&f.pool).unwrap();
        diesel::sql_query(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON quotes WHEN NEW.ticker = 'BAD' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&mut conn)
        .unwrap();
        drop(conn);

        assert_eq!(f.repo.statistics().unwrap().total_records, 0);

        // Third sub-batch holds the rejected row.
        let records: Vec<QuoteRecord> = (0..21)
            .map(|i| {
                let ticker = if i == 15 { "BAD".to_string() } else { format!("FII{:03}", i) };
                quote((2024, 3, 1), &ticker, dec!(10.00))
            })
            .collect();

        assert!(f.repo.upsert_batch(&records).await.is_err());

        let stats = f.repo.statistics().unwrap();
        assert_eq!(stats.total_records, 14);
        assert_eq!(f.repo.list_tickers().unwrap().len(), 14);
        assert!(f.repo.quotes_for_ticker("FII016", None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_applies_write_policies() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("quotes.db");
        let (pool, writer) = db::open(db_path.to_str().unwrap()).unwrap();
        let config = IngestConfig {
            batch_sizing: BatchSizing {
                small: 3,
                medium: 4,
                large: 5,
                max_batch_bytes: 512,
                bytes_per_record: Some(64),
            },
            lock_retry: LockRetryPolicy {
                max_attempts: 5,
                delay: Duration::from_millis(20),
            },
            ..IngestConfig::default()
        };
        let cache = Arc::new(Cache::from_config(&config));

        let repo = QuoteRepository::from_config(pool, writer, cache, &config);

        assert_eq!(repo.batch_sizing, config.batch_sizing);
        assert_eq!(repo.lock_retry, config.lock_retry);
    }

    #[tokio::test]
    async fn test_writes_invalidate_cached_reads() {
        let f = fixture();
        assert_eq!(f.repo.last_date().unwrap(), None);
        assert!(f.repo.list_tickers().unwrap().is_empty());

        f.repo
            .upsert_batch(&[quote((2024, 5, 10), "XPML11", dec!(110.50))])
            .await
            .unwrap();

        assert_eq!(
            f.repo.last_date().unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 10)
        );
        assert_eq!(f.repo.list_tickers().unwrap(), vec!["XPML11".to_string()]);
    }

    #[tokio::test]
    async fn test_statistics_and_ticker_queries() {
        let f = fixture();
        f.repo
            .upsert_batch(&[
                quote((2023, 12, 28), "KNRI11", dec!(150.00)),
                quote((2024, 1, 2), "HGLG11", dec!(160.00)),
                quote((2024, 1, 3), "HGLG11", dec!(161.00)),
                quote((2024, 1, 4), "HGLG11", dec!(162.00)),
            ])
            .await
            .unwrap();

        let stats = f.repo.statistics().unwrap();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.total_tickers, 2);
        assert_eq!(stats.min_date, NaiveDate::from_ymd_opt(2023, 12, 28));
        assert_eq!(stats.max_date, NaiveDate::from_ymd_opt(2024, 1, 4));

        assert_eq!(
            f.repo.list_tickers().unwrap(),
            vec!["HGLG11".to_string(), "KNRI11".to_string()]
        );

        let bounded = f
            .repo
            .quotes_for_ticker(
                "HGLG11",
                NaiveDate::from_ymd_opt(2024, 1, 3),
                NaiveDate::from_ymd_opt(2024, 1, 3),
            )
            .unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].close, dec!(161.00));
    }

    #[tokio::test]
    async fn test_delete_range_is_inclusive() {
        let f = fixture();
        f.repo
            .upsert_batch(&[
                quote((2024, 1, 31), "HGLG11", dec!(160.00)),
                quote((2024, 2, 1), "HGLG11", dec!(161.00)),
                quote((2024, 2, 29), "HGLG11", dec!(162.00)),
                quote((2024, 3, 1), "HGLG11", dec!(163.00)),
            ])
            .await
            .unwrap();
        assert_eq!(f.repo.statistics().unwrap().total_records, 4);

        let removed = f
            .repo
            .delete_range(
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(removed, 2);
        let stats = f.repo.statistics().unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.max_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    }
}
