use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::chunking::ChunkScheduler;
use super::fetcher::Fetcher;
use super::report::{BatchReport, DatabaseOverview, FileFailure, FileReport, FileStatus};
use crate::config::IngestConfig;
use crate::errors::{Error, Result};
use crate::files::{
    archive_file_name, classify, discover_files, extract_text, ArchivePair, ClassifiedFile,
    FileFormat, LedgerStatus, PeriodKind, ProcessedFileLedger,
};
use crate::quotes::{QuoteRecord, QuoteStore};

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub file: ClassifiedFile,
    /// Purge the file's date span before inserting.
    pub replace_existing: bool,
}

/// Orchestrates parsing, storage and ledger registration of quote files.
///
/// File streaming and store commits run sequentially on the caller's task;
/// only parsing fans out to the chunk pool.
pub struct IngestService {
    config: Arc<IngestConfig>,
    quotes: Arc<dyn QuoteStore>,
    ledger: Arc<ProcessedFileLedger>,
    scheduler: Arc<ChunkScheduler>,
}

impl IngestService {
    pub fn new(
        config: Arc<IngestConfig>,
        quotes: Arc<dyn QuoteStore>,
        ledger: Arc<ProcessedFileLedger>,
    ) -> Self {
        let scheduler = Arc::new(ChunkScheduler::from_config(&config));
        Self {
            config,
            quotes,
            ledger,
            scheduler,
        }
    }

    pub fn with_scheduler(mut self, scheduler: ChunkScheduler) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /// Ingests one classified file and returns the number of records inserted.
    ///
    /// Safe to call repeatedly: an archive whose hash is unchanged is skipped
    /// unless `replace_existing` is set, and a changed archive always has its
    /// date span purged first.
    pub async fn ingest_file(&self, file: &ClassifiedFile, replace_existing: bool) -> Result<usize> {
        Ok(self.ingest_file_report(file, replace_existing).await?.records_inserted)
    }

    /// Same as [`ingest_file`](Self::ingest_file) but returns the full report.
    pub async fn ingest_file_report(
        &self,
        file: &ClassifiedFile,
        replace_existing: bool,
    ) -> Result<FileReport> {
        let status = self.ledger.verify(&file.path).await?;
        if status == LedgerStatus::Unchanged && !replace_existing {
            info!("{} already processed and unchanged, skipping", file.file_name);
            return Ok(FileReport::skipped(&file.file_name));
        }
        let replace = replace_existing || status.is_changed();
        info!(
            "Ingesting {}{}",
            file,
            if replace { " (replacing existing data)" } else { "" }
        );

        let text = self.working_text(file, status).await?;

        let records_removed = if replace {
            let removed = self.quotes.delete_range(file.start_date, file.end_date).await?;
            info!(
                "Removed {} records between {} and {}",
                removed, file.start_date, file.end_date
            );
            removed
        } else {
            0
        };

        let (records, chunks_failed) = self.parse(file.kind, &text).await?;
        let records_parsed = records.len();
        let records_inserted = self.quotes.upsert_batch(&records).await?;

        let status = if chunks_failed > 0 {
            warn!(
                "{}: {} chunks failed, leaving the file unregistered so it is retried",
                file.file_name, chunks_failed
            );
            FileStatus::Partial
        } else {
            self.ledger
                .register(&text, file.kind, records_inserted, self.config.remove_working_copy)
                .await?;
            if replace {
                FileStatus::Reprocessed
            } else {
                FileStatus::Ingested
            }
        };

        info!(
            "{}: {} records parsed, {} inserted",
            file.file_name, records_parsed, records_inserted
        );
        Ok(FileReport {
            file_name: file.file_name.clone(),
            status,
            records_parsed,
            records_inserted,
            records_removed,
            chunks_failed,
        })
    }

    /// Returns the text file to parse, extracting the archive when needed.
    async fn working_text(&self, file: &ClassifiedFile, status: LedgerStatus) -> Result<PathBuf> {
        if file.format == FileFormat::Text {
            return Ok(file.path.clone());
        }
        let pair = ArchivePair::for_path(&file.path)
            .ok_or_else(|| Error::Unexpected(format!("{} is not an archive", file.path.display())))?;

        if pair.has_text() {
            if !status.is_changed() {
                debug!("Reusing extracted {}", pair.text.display());
                return Ok(pair.text);
            }
            // Stale copy of the previous archive contents.
            fs::remove_file(&pair.text)?;
        }

        let archive = pair.archive.clone();
        let dest = archive
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.data_dir.clone());
        let retries = self.config.extract_retries;
        let delay = self.config.extract_retry_delay;
        tokio::task::spawn_blocking(move || extract_text(&archive, &dest, retries, delay))
            .await
            .map_err(|e| Error::Unexpected(format!("Extraction task failed: {}", e)))?
    }

    /// Parses the text file; large periods go through the chunk pool.
    async fn parse(&self, kind: PeriodKind, text: &Path) -> Result<(Vec<QuoteRecord>, usize)> {
        let scheduler = Arc::clone(&self.scheduler);
        let path = text.to_path_buf();
        let chunked = kind.is_chunked();

        tokio::task::spawn_blocking(move || -> Result<(Vec<QuoteRecord>, usize)> {
            if chunked {
                let outcome = scheduler.run(&path)?;
                let failed = outcome.chunks_failed();
                Ok((outcome.records, failed))
            } else {
                Ok((scheduler.parse_sequential(&path)?, 0))
            }
        })
        .await
        .map_err(|e| Error::Unexpected(format!("Parse task failed: {}", e)))?
    }

    // =========================================================================
    // Batch runs
    // =========================================================================

    /// Files in `dir` that are new or whose archive changed, in processing order.
    pub async fn pending_files(&self, dir: &Path) -> Result<Vec<PendingFile>> {
        let mut pending = Vec::new();
        for file in discover_files(dir)? {
            match self.ledger.verify(&file.path).await? {
                LedgerStatus::Unknown => pending.push(PendingFile {
                    file,
                    replace_existing: false,
                }),
                LedgerStatus::Changed => pending.push(PendingFile {
                    file,
                    replace_existing: true,
                }),
                LedgerStatus::Unchanged => debug!("{} is up to date", file.file_name),
            }
        }
        info!("{} files pending in {}", pending.len(), dir.display());
        Ok(pending)
    }

    /// Ingests every new or changed file in `dir`.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<BatchReport> {
        let pending = self.pending_files(dir).await?;
        Ok(self.ingest_pending(pending).await)
    }

    /// Ingests the given files in order, isolating per-file failures.
    pub async fn ingest_pending(&self, pending: Vec<PendingFile>) -> BatchReport {
        let mut report = BatchReport {
            total_files: pending.len(),
            ..BatchReport::default()
        };
        for item in pending {
            match self.ingest_file_report(&item.file, item.replace_existing).await {
                Ok(file_report) => report.files.push(file_report),
                Err(e) => {
                    error!("Failed to ingest {}: {}", item.file.file_name, e);
                    report.failures.push(FileFailure {
                        file_name: item.file.file_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!("{}", report);
        report
    }

    /// Classifies and ingests arbitrary paths. Unrecognized names are reported
    /// as failures without stopping the run.
    pub async fn ingest_paths(&self, paths: &[PathBuf], replace_existing: bool) -> BatchReport {
        let mut pending = Vec::new();
        let mut failures = Vec::new();
        for path in paths {
            match classify(path) {
                Ok(file) => pending.push(PendingFile {
                    file,
                    replace_existing,
                }),
                Err(e) => {
                    error!("Skipping {}: {}", path.display(), e);
                    failures.push(FileFailure {
                        file_name: path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| path.display().to_string()),
                        reason: e.to_string(),
                    });
                }
            }
        }
        pending.sort_by(|a, b| a.file.cmp(&b.file));

        let mut report = self.ingest_pending(pending).await;
        report.total_files += failures.len();
        report.failures.extend(failures);
        report
    }

    // =========================================================================
    // Collaborators and reads
    // =========================================================================

    /// Downloads the archive for a period through `fetcher` and ingests it.
    ///
    /// Returns `None` when the exchange has not published the file.
    pub async fn fetch_and_ingest(
        &self,
        fetcher: &dyn Fetcher,
        kind: PeriodKind,
        day: Option<u32>,
        month: Option<u32>,
        year: i32,
    ) -> Result<Option<FileReport>> {
        let name = archive_file_name(kind, day, month, year)?;
        if !fetcher.file_available(kind, day, month, year).await {
            info!("{} is not available yet", name);
            return Ok(None);
        }
        let path = fetcher.fetch(&name).await?;
        let file = classify(&path)?;
        self.ingest_file_report(&file, false).await.map(Some)
    }

    /// Quote statistics combined with the ledger grouped by kind.
    pub fn overview(&self) -> Result<DatabaseOverview> {
        let by_kind = self.ledger.summary_by_kind()?;
        Ok(DatabaseOverview {
            quotes: self.quotes.statistics()?,
            last_date: self.quotes.last_date()?,
            processed_files: by_kind.iter().map(|k| k.files).sum(),
            by_kind,
        })
    }
}
