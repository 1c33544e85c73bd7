//! Outcome types reported by the ingestion service.

use chrono::NaiveDate;
use serde::Serialize;

use crate::files::KindSummary;
use crate::quotes::QuoteStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    /// Archive unchanged since it was registered.
    Skipped,
    /// First ingestion of the file.
    Ingested,
    /// Date span purged and ingested again.
    Reprocessed,
    /// Some chunks failed; the file was not registered so it is retried next run.
    Partial,
}

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file_name: String,
    pub status: FileStatus,
    pub records_parsed: usize,
    pub records_inserted: usize,
    pub records_removed: usize,
    pub chunks_failed: usize,
}

impl FileReport {
    pub(crate) fn skipped(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            status: FileStatus::Skipped,
            records_parsed: 0,
            records_inserted: 0,
            records_removed: 0,
            chunks_failed: 0,
        }
    }
}

/// A file that could not be ingested, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file_name: String,
    pub reason: String,
}

/// Summary of a multi-file run. Failures never abort the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total_files: usize,
    pub files: Vec<FileReport>,
    pub failures: Vec<FileFailure>,
}

impl BatchReport {
    /// Files that completed without error, skipped ones included.
    pub fn processed(&self) -> usize {
        self.files.len()
    }

    pub fn records_inserted(&self) -> usize {
        self.files.iter().map(|f| f.records_inserted).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} files processed, {} records inserted",
            self.processed(),
            self.total_files,
            self.records_inserted()
        )?;
        for failure in &self.failures {
            write!(f, "\n  failed {}: {}", failure.file_name, failure.reason)?;
        }
        Ok(())
    }
}

/// Snapshot of the database contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseOverview {
    pub quotes: QuoteStatistics,
    pub last_date: Option<NaiveDate>,
    pub processed_files: usize,
    pub by_kind: Vec<KindSummary>,
}
