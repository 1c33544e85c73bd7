//! End-to-end ingestion against a real SQLite database.
//!
//! Covered contracts:
//! 1. Re-running a directory ingests nothing new and leaves the ledger as is
//! 2. A republished archive purges its period and replaces the quotes
//! 3. Overlapping annual and daily files never duplicate a (date, ticker) key

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tempfile::{tempdir, TempDir};
use zip::write::SimpleFileOptions;

use cotahist_core::files::{LedgerStatus, ProcessedFileLedger};
use cotahist_core::ingest::{FileStatus, IngestService};
use cotahist_core::quotes::QuoteStore;
use cotahist_core::utils::retry::LockRetryPolicy;
use cotahist_core::{Cache, IngestConfig};
use cotahist_storage_sqlite::{open, ProcessedFileRepository, QuoteRepository};

const LINE_LENGTH: usize = 245;

/// Builds a type `01` line; every price field carries `close_cents`.
fn quote_line(date: &str, class_code: &str, ticker: &str, close_cents: u64) -> String {
    let mut line = String::with_capacity(LINE_LENGTH);
    line.push_str("01");
    line.push_str(date);
    line.push_str(&format!("{:<2}", class_code));
    line.push_str(&format!("{:<12}", ticker));
    line.push_str("010");
    line.push_str(&format!("{:<12}", "FUNDO TESTE"));
    line.push_str(&format!("{:<10}", "CI"));
    line.push_str(&" ".repeat(7));
    for _ in 0..7 {
        line.push_str(&format!("{:013}", close_cents));
    }
    line.push_str(&format!("{:05}", 42));
    line.push_str(&format!("{:018}", 1000));
    line.push_str(&format!("{:018}", close_cents * 1000));
    while line.len() < LINE_LENGTH {
        line.push('0');
    }
    line
}

fn quote_file(lines: &[String]) -> Vec<u8> {
    let mut text = format!("00COTAHIST.2024BOVESPA 20240102{}\n", " ".repeat(214));
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text.push_str(&format!("99COTAHIST.2024BOVESPA 20240102{}\n", " ".repeat(214)));
    text.into_bytes()
}

fn write_archive(dir: &Path, name: &str, lines: &[String]) {
    let member = name.replace(".ZIP", ".TXT");
    let file = File::create(dir.join(name)).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer.start_file(member, SimpleFileOptions::default()).unwrap();
    writer.write_all(&quote_file(lines)).unwrap();
    writer.finish().unwrap();
}

struct Pipeline {
    data_dir: TempDir,
    _db_dir: TempDir,
    quotes: Arc<QuoteRepository>,
    ledger: Arc<ProcessedFileLedger>,
    service: IngestService,
}

fn pipeline() -> Pipeline {
    let data_dir = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db_path = db_dir.path().join("quotes.db");

    let config = IngestConfig {
        data_dir: data_dir.path().to_path_buf(),
        database_url: db_path.to_string_lossy().to_string(),
        worker_count: 2,
        chunk_lines: 2,
        lock_retry: LockRetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        },
        extract_retry_delay: Duration::from_millis(10),
        ..IngestConfig::default()
    };

    let (pool, writer) = open(&config.database_url).unwrap();
    let cache = Arc::new(Cache::from_config(&config));
    let quotes = Arc::new(QuoteRepository::from_config(
        pool.clone(),
        writer.clone(),
        cache.clone(),
        &config,
    ));
    let ledger_store = Arc::new(ProcessedFileRepository::from_config(pool, writer, &config));
    let ledger = Arc::new(ProcessedFileLedger::new(ledger_store, cache));
    let service = IngestService::new(Arc::new(config), quotes.clone(), ledger.clone());

    Pipeline {
        data_dir,
        _db_dir: db_dir,
        quotes,
        ledger,
        service,
    }
}

#[tokio::test]
async fn test_second_run_inserts_nothing() {
    let p = pipeline();
    write_archive(
        p.data_dir.path(),
        "COTAHIST_D02012024.ZIP",
        &[
            quote_line("20240102", "12", "HGLG11", 16000),
            quote_line("20240102", "02", "PETR4", 3800),
            quote_line("20240102", "12", "KNRI11", 14000),
        ],
    );

    let first = p.service.ingest_directory(p.data_dir.path()).await.unwrap();
    assert!(first.is_complete());
    assert_eq!(first.records_inserted(), 2);
    assert!(!p.data_dir.path().join("COTAHIST_D02012024.TXT").exists());

    let second = p.service.ingest_directory(p.data_dir.path()).await.unwrap();
    assert_eq!(second.total_files, 0);
    assert_eq!(second.records_inserted(), 0);

    let ledger_rows = p.ledger.list_processed().unwrap();
    assert_eq!(ledger_rows.len(), 1);
    assert_eq!(ledger_rows[0].file_name, "COTAHIST_D02012024.ZIP");
    assert_eq!(ledger_rows[0].records_added, 2);

    let archive = p.data_dir.path().join("COTAHIST_D02012024.ZIP");
    assert_eq!(p.ledger.verify(&archive).await.unwrap(), LedgerStatus::Unchanged);
    assert_eq!(p.quotes.statistics().unwrap().total_records, 2);
}

#[tokio::test]
async fn test_republished_archive_replaces_period() {
    let p = pipeline();
    let name = "COTAHIST_M012024.ZIP";
    write_archive(
        p.data_dir.path(),
        name,
        &[
            quote_line("20240102", "12", "HGLG11", 16000),
            quote_line("20240103", "12", "HGLG11", 16100),
        ],
    );
    p.service.ingest_directory(p.data_dir.path()).await.unwrap();

    write_archive(
        p.data_dir.path(),
        name,
        &[
            quote_line("20240102", "12", "HGLG11", 15900),
            quote_line("20240103", "12", "HGLG11", 16150),
            quote_line("20240104", "12", "HGLG11", 16200),
        ],
    );
    let archive = p.data_dir.path().join(name);
    assert_eq!(p.ledger.verify(&archive).await.unwrap(), LedgerStatus::Changed);

    let report = p.service.ingest_directory(p.data_dir.path()).await.unwrap();
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].status, FileStatus::Reprocessed);
    assert_eq!(report.files[0].records_removed, 2);
    assert_eq!(report.files[0].records_inserted, 3);

    let stored = p.quotes.quotes_for_ticker("HGLG11", None, None).unwrap();
    let closes: Vec<_> = stored.iter().map(|q| q.close).collect();
    assert_eq!(closes, vec![dec!(159.00), dec!(161.50), dec!(162.00)]);
    assert_eq!(p.ledger.verify(&archive).await.unwrap(), LedgerStatus::Unchanged);
}

#[tokio::test]
async fn test_overlapping_files_keep_keys_unique() {
    let p = pipeline();
    write_archive(
        p.data_dir.path(),
        "COTAHIST_A2024.ZIP",
        &[
            quote_line("20240102", "12", "HGLG11", 16000),
            quote_line("20240103", "12", "HGLG11", 16100),
            quote_line("20240103", "12", "XPML11", 11000),
        ],
    );
    write_archive(
        p.data_dir.path(),
        "COTAHIST_D03012024.ZIP",
        &[
            quote_line("20240103", "12", "HGLG11", 16100),
            quote_line("20240103", "12", "XPML11", 11000),
        ],
    );

    let report = p.service.ingest_directory(p.data_dir.path()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.files[0].file_name, "COTAHIST_A2024.ZIP");
    assert_eq!(report.records_inserted(), 3);

    let stats = p.quotes.statistics().unwrap();
    assert_eq!(stats.total_records, 3);
    assert_eq!(stats.total_tickers, 2);
    assert_eq!(stats.max_date, NaiveDate::from_ymd_opt(2024, 1, 3));

    let overview = p.service.overview().unwrap();
    assert_eq!(overview.processed_files, 2);
    assert_eq!(overview.last_date, NaiveDate::from_ymd_opt(2024, 1, 3));
    let kinds: Vec<&str> = overview.by_kind.iter().map(|k| k.kind.as_str()).collect();
    assert_eq!(kinds, vec!["annual", "daily"]);

    assert!(fs::read_dir(p.data_dir.path())
        .unwrap()
        .all(|e| !e.unwrap().path().to_string_lossy().ends_with(".TXT")));
}
