//! File and ledger domain models.

use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// =============================================================================
// Classified File
// =============================================================================

/// Period covered by a COTAHIST file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Annual,
    Monthly,
    Daily,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Annual => "annual",
            PeriodKind::Monthly => "monthly",
            PeriodKind::Daily => "daily",
        }
    }

    /// Processing order: annual files first, daily files last.
    fn rank(&self) -> u8 {
        match self {
            PeriodKind::Annual => 0,
            PeriodKind::Monthly => 1,
            PeriodKind::Daily => 2,
        }
    }

    /// Large files are split into chunks and parsed in parallel.
    pub fn is_chunked(&self) -> bool {
        !matches!(self, PeriodKind::Daily)
    }
}

impl std::fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a file is the compressed archive or the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Archive,
    Text,
}

/// A file whose name has been matched against the COTAHIST naming scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: PeriodKind,
    pub format: FileFormat,
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Ord for ClassifiedFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .rank()
            .cmp(&other.kind.rank())
            .then(self.start_date.cmp(&other.start_date))
            .then_with(|| self.file_name.cmp(&other.file_name))
    }
}

impl PartialOrd for ClassifiedFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ClassifiedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}: {} to {})",
            self.file_name,
            self.kind,
            self.start_date.format("%d/%m/%Y"),
            self.end_date.format("%d/%m/%Y")
        )
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Ledger row for an ingested source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFile {
    pub file_name: String,
    pub kind: String,
    pub processed_at: NaiveDateTime,
    pub records_added: i64,
    /// SHA-256 of the archive bytes, or of the text when no archive exists.
    pub content_hash: Option<String>,
}

/// Ledger answer for a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LedgerStatus {
    /// Never registered, or its hash cannot be established.
    Unknown,
    /// Registered and the archive hash still matches.
    Unchanged,
    /// Registered but the archive hash differs; purge and reprocess.
    Changed,
}

impl LedgerStatus {
    pub fn is_processed(&self) -> bool {
        !matches!(self, LedgerStatus::Unknown)
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, LedgerStatus::Changed)
    }

    /// `(processed, changed)` pair.
    pub fn as_flags(&self) -> (bool, bool) {
        (self.is_processed(), self.is_changed())
    }
}

/// Processed files and records added, grouped by period kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    pub kind: String,
    pub files: usize,
    pub records: i64,
}
