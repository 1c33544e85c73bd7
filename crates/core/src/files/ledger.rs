//! Ledger of ingested source files.
//!
//! The ledger answers two questions for a file on disk: has it been ingested,
//! and has its archive changed since then. Change detection always hashes the
//! compressed archive; the extracted text is only a transient working copy.
//! When no archive exists the text itself is hashed and registered, and the
//! text is then never removed automatically.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use super::archive::{file_name_of, hash_file, ArchivePair};
use super::classifier::FILE_PREFIX;
use super::model::{KindSummary, LedgerStatus, PeriodKind, ProcessedFile};
use crate::cache::{Cache, PROCESSED_FILES};
use crate::errors::{Error, Result};

/// Persistence interface for ledger rows.
#[async_trait]
pub trait ProcessedFileStore: Send + Sync {
    /// Inserts the row, replacing any existing row with the same file name.
    async fn upsert(&self, file: ProcessedFile) -> Result<()>;

    fn get(&self, file_name: &str) -> Result<Option<ProcessedFile>>;

    /// All rows ordered by kind, then file name.
    fn list(&self) -> Result<Vec<ProcessedFile>>;
}

/// Ledger service on top of a [`ProcessedFileStore`].
pub struct ProcessedFileLedger {
    store: Arc<dyn ProcessedFileStore>,
    cache: Arc<Cache>,
}

/// Hashes `path` on the blocking pool; archives can be hundreds of megabytes.
async fn hash_blocking(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| Error::Unexpected(format!("Hashing task failed: {}", e)))?
}

impl ProcessedFileLedger {
    pub fn new(store: Arc<dyn ProcessedFileStore>, cache: Arc<Cache>) -> Self {
        Self { store, cache }
    }

    /// Ledger row for `file_name`, read through the cache.
    pub fn get(&self, file_name: &str) -> Result<Option<ProcessedFile>> {
        self.cache
            .get_or_compute(PROCESSED_FILES, format!("file:{}", file_name), || {
                self.store.get(file_name)
            })
    }

    /// Checks whether the archive behind `path` was ingested and whether it changed.
    ///
    /// `path` may point at the archive or at its extracted text. A text file
    /// without a sibling archive is always `Unknown`, as is any file whose
    /// hash cannot be computed.
    pub async fn verify(&self, path: &Path) -> Result<LedgerStatus> {
        let Some(pair) = ArchivePair::for_path(path) else {
            debug!("{} is neither an archive nor a text file", path.display());
            return Ok(LedgerStatus::Unknown);
        };
        if !pair.has_archive() {
            return Ok(LedgerStatus::Unknown);
        }

        let archive_name = file_name_of(&pair.archive).to_uppercase();
        let stored_hash = match self.get(&archive_name)? {
            Some(ProcessedFile {
                content_hash: Some(hash),
                ..
            }) if !hash.is_empty() => hash,
            _ => return Ok(LedgerStatus::Unknown),
        };

        let current_hash = match hash_blocking(pair.archive.clone()).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    "Could not hash {}: {}. Treating as not processed",
                    pair.archive.display(),
                    e
                );
                return Ok(LedgerStatus::Unknown);
            }
        };

        if current_hash == stored_hash {
            Ok(LedgerStatus::Unchanged)
        } else {
            info!("Archive {} changed since it was processed", archive_name);
            Ok(LedgerStatus::Changed)
        }
    }

    /// Records a successful ingestion of the file at `path`.
    ///
    /// The archive is hashed and registered when it exists. Otherwise the text
    /// is registered under its own name and is kept on disk regardless of
    /// `remove_working_copy`.
    pub async fn register(
        &self,
        path: &Path,
        kind: PeriodKind,
        records_added: usize,
        remove_working_copy: bool,
    ) -> Result<ProcessedFile> {
        let pair = ArchivePair::for_path(path);
        let (target, removable_text): (PathBuf, Option<PathBuf>) = match &pair {
            Some(p) if p.has_archive() => (p.archive.clone(), Some(p.text.clone())),
            _ => {
                warn!(
                    "No archive found for {}, registering the text file itself",
                    path.display()
                );
                (path.to_path_buf(), None)
            }
        };

        let row = ProcessedFile {
            file_name: file_name_of(&target).to_uppercase(),
            kind: kind.as_str().to_string(),
            processed_at: Utc::now().naive_utc(),
            records_added: records_added as i64,
            content_hash: Some(hash_blocking(target.clone()).await?),
        };
        self.store.upsert(row.clone()).await?;
        self.cache.invalidate(PROCESSED_FILES, None);
        info!(
            "Registered {} ({} records added)",
            row.file_name, row.records_added
        );

        if remove_working_copy {
            if let Some(text) = removable_text.filter(|t| t.is_file()) {
                match fs::remove_file(&text) {
                    Ok(()) => debug!("Removed working copy {}", text.display()),
                    Err(e) => warn!("Failed to remove working copy {}: {}", text.display(), e),
                }
            }
        }

        Ok(row)
    }

    /// All ledger rows ordered by kind, then file name.
    pub fn list_processed(&self) -> Result<Vec<ProcessedFile>> {
        self.cache
            .get_or_compute(PROCESSED_FILES, "list_all", || self.store.list())
    }

    /// File count and records added per kind.
    pub fn summary_by_kind(&self) -> Result<Vec<KindSummary>> {
        let mut grouped: BTreeMap<String, KindSummary> = BTreeMap::new();
        for file in self.list_processed()? {
            let entry = grouped.entry(file.kind.clone()).or_insert_with(|| KindSummary {
                kind: file.kind.clone(),
                files: 0,
                records: 0,
            });
            entry.files += 1;
            entry.records += file.records_added;
        }
        Ok(grouped.into_values().collect())
    }

    /// Archives in `dir` that have never been registered, sorted by name.
    pub fn pending_archives(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut pending = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = file_name_of(&path).to_uppercase();
            if !name.starts_with(FILE_PREFIX) || !name.ends_with(".ZIP") || !path.is_file() {
                continue;
            }
            if self.get(&name)?.is_none() {
                pending.push(path);
            }
        }
        pending.sort();
        Ok(pending)
    }
}
