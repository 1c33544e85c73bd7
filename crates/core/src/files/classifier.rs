//! Classifies COTAHIST files by name and discovers them on disk.
//!
//! Three naming schemes exist:
//! - `COTAHIST_AYYYY` - annual, Jan 1 to Dec 31
//! - `COTAHIST_MMMYYYY` - monthly, first to last day of the month
//! - `COTAHIST_DDDMMYYYY` - daily, a single trading day
//!
//! each with a `.ZIP` or `.TXT` extension.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::NaiveDate;
use log::{debug, warn};
use regex::Regex;

use super::model::{ClassifiedFile, FileFormat, PeriodKind};
use crate::errors::{ClassifyError, Result};
use crate::utils::time_utils::last_day_of_month;

/// Common prefix of every quote file.
pub const FILE_PREFIX: &str = "COTAHIST_";

static ANNUAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^COTAHIST_A(\d{4})\.(TXT|ZIP)$").expect("valid regex"));
static MONTHLY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^COTAHIST_M(\d{2})(\d{4})\.(TXT|ZIP)$").expect("valid regex"));
static DAILY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^COTAHIST_D(\d{2})(\d{2})(\d{4})\.(TXT|ZIP)$").expect("valid regex")
});

/// Classifies a file by its name. The directory part of `path` is ignored.
pub fn classify(path: impl AsRef<Path>) -> std::result::Result<ClassifiedFile, ClassifyError> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let normalized = file_name.to_uppercase();

    let (kind, year, month, day, ext) = if let Some(caps) = ANNUAL_PATTERN.captures(&normalized) {
        (PeriodKind::Annual, number(&caps[1]), None, None, caps[2].to_string())
    } else if let Some(caps) = MONTHLY_PATTERN.captures(&normalized) {
        (
            PeriodKind::Monthly,
            number(&caps[2]),
            Some(number(&caps[1]) as u32),
            None,
            caps[3].to_string(),
        )
    } else if let Some(caps) = DAILY_PATTERN.captures(&normalized) {
        (
            PeriodKind::Daily,
            number(&caps[3]),
            Some(number(&caps[2]) as u32),
            Some(number(&caps[1]) as u32),
            caps[4].to_string(),
        )
    } else {
        return Err(ClassifyError::UnrecognizedFormat(file_name));
    };

    let invalid = || ClassifyError::InvalidDate(file_name.clone());
    let (start_date, end_date) = match (kind, month, day) {
        (PeriodKind::Annual, _, _) => (
            NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?,
            NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(invalid)?,
        ),
        (PeriodKind::Monthly, Some(m), _) => (
            NaiveDate::from_ymd_opt(year, m, 1).ok_or_else(invalid)?,
            last_day_of_month(year, m).ok_or_else(invalid)?,
        ),
        (PeriodKind::Daily, Some(m), Some(d)) => {
            let date = NaiveDate::from_ymd_opt(year, m, d).ok_or_else(invalid)?;
            (date, date)
        }
        _ => return Err(invalid()),
    };

    let format = if ext == "ZIP" {
        FileFormat::Archive
    } else {
        FileFormat::Text
    };

    Ok(ClassifiedFile {
        path: path.to_path_buf(),
        file_name,
        kind,
        format,
        year,
        month,
        day,
        start_date,
        end_date,
    })
}

fn number(digits: &str) -> i32 {
    // The patterns only capture ASCII digits of bounded width.
    digits.parse().unwrap_or_default()
}

/// Builds the canonical archive name for a period.
pub fn archive_file_name(
    kind: PeriodKind,
    day: Option<u32>,
    month: Option<u32>,
    year: i32,
) -> Result<String> {
    let name = match (kind, day, month) {
        (PeriodKind::Annual, _, _) => format!("{}A{:04}.ZIP", FILE_PREFIX, year),
        (PeriodKind::Monthly, _, Some(m)) => format!("{}M{:02}{:04}.ZIP", FILE_PREFIX, m, year),
        (PeriodKind::Daily, Some(d), Some(m)) => {
            format!("{}D{:02}{:02}{:04}.ZIP", FILE_PREFIX, d, m, year)
        }
        _ => {
            return Err(ClassifyError::InvalidDate(format!(
                "{} period for year {} needs day/month",
                kind, year
            ))
            .into())
        }
    };
    // Round-trip through the classifier so impossible dates are rejected.
    classify(&name)?;
    Ok(name)
}

/// Lists the classifiable quote files in `dir`, in processing order.
///
/// When both the archive and its extracted text exist, only the archive is
/// returned. Unrecognized `COTAHIST_*` names are logged and skipped.
pub fn discover_files(dir: impl AsRef<Path>) -> Result<Vec<ClassifiedFile>> {
    let dir = dir.as_ref();
    let mut by_stem: HashMap<String, ClassifiedFile> = HashMap::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_uppercase();
        if !name.starts_with(FILE_PREFIX) {
            continue;
        }
        let classified = match classify(entry.path()) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring {}: {}", name, e);
                continue;
            }
        };
        let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&name).to_string();
        let keep_existing = by_stem
            .get(&stem)
            .map(|existing| existing.format == FileFormat::Archive)
            .unwrap_or(false);
        if !keep_existing {
            by_stem.insert(stem, classified);
        }
    }

    let mut files: Vec<ClassifiedFile> = by_stem.into_values().collect();
    files.sort();
    debug!("Discovered {} quote files in {}", files.len(), dir.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_archive() {
        let file = classify("COTAHIST_D02012024.ZIP").unwrap();
        assert_eq!(file.kind, PeriodKind::Daily);
        assert_eq!(file.format, FileFormat::Archive);
        assert_eq!(file.start_date, date(2024, 1, 2));
        assert_eq!(file.end_date, date(2024, 1, 2));
        assert_eq!((file.day, file.month, file.year), (Some(2), Some(1), 2024));
    }

    #[test]
    fn test_annual_text() {
        let file = classify("/data/COTAHIST_A2023.TXT").unwrap();
        assert_eq!(file.kind, PeriodKind::Annual);
        assert_eq!(file.format, FileFormat::Text);
        assert_eq!(file.file_name, "COTAHIST_A2023.TXT");
        assert_eq!(file.start_date, date(2023, 1, 1));
        assert_eq!(file.end_date, date(2023, 12, 31));
    }

    #[test]
    fn test_monthly_handles_month_length() {
        let feb_leap = classify("COTAHIST_M022024.ZIP").unwrap();
        assert_eq!(feb_leap.kind, PeriodKind::Monthly);
        assert_eq!(feb_leap.start_date, date(2024, 2, 1));
        assert_eq!(feb_leap.end_date, date(2024, 2, 29));

        assert_eq!(classify("COTAHIST_M022023.ZIP").unwrap().end_date, date(2023, 2, 28));
        assert_eq!(classify("COTAHIST_M122023.TXT").unwrap().end_date, date(2023, 12, 31));
    }

    #[test]
    fn test_lowercase_names_are_normalized() {
        let file = classify("cotahist_d02012024.zip").unwrap();
        assert_eq!(file.kind, PeriodKind::Daily);
        assert_eq!(file.file_name, "cotahist_d02012024.zip");
    }

    #[test]
    fn test_unrecognized_names_fail() {
        for name in ["quotes.txt", "COTAHIST_X2024.ZIP", "COTAHIST_A24.ZIP", "COTAHIST_A2024.CSV"] {
            assert!(matches!(
                classify(name),
                Err(ClassifyError::UnrecognizedFormat(_))
            ));
        }
    }

    #[test]
    fn test_impossible_dates_fail() {
        assert!(matches!(
            classify("COTAHIST_M132024.ZIP"),
            Err(ClassifyError::InvalidDate(_))
        ));
        assert!(matches!(
            classify("COTAHIST_D30022024.ZIP"),
            Err(ClassifyError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_processing_order() {
        let mut files = vec![
            classify("COTAHIST_D03012024.ZIP").unwrap(),
            classify("COTAHIST_M012024.ZIP").unwrap(),
            classify("COTAHIST_D02012024.ZIP").unwrap(),
            classify("COTAHIST_A2023.ZIP").unwrap(),
        ];
        files.sort();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "COTAHIST_A2023.ZIP",
                "COTAHIST_M012024.ZIP",
                "COTAHIST_D02012024.ZIP",
                "COTAHIST_D03012024.ZIP"
            ]
        );
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name(PeriodKind::Annual, None, None, 2024).unwrap(),
            "COTAHIST_A2024.ZIP"
        );
        assert_eq!(
            archive_file_name(PeriodKind::Monthly, None, Some(1), 2024).unwrap(),
            "COTAHIST_M012024.ZIP"
        );
        assert_eq!(
            archive_file_name(PeriodKind::Daily, Some(2), Some(1), 2024).unwrap(),
            "COTAHIST_D02012024.ZIP"
        );
        assert!(archive_file_name(PeriodKind::Daily, None, Some(1), 2024).is_err());
        assert!(archive_file_name(PeriodKind::Daily, Some(31), Some(2), 2024).is_err());
    }

    #[test]
    fn test_discover_prefers_archives() {
        let dir = tempdir().unwrap();
        for name in [
            "COTAHIST_D02012024.ZIP",
            "COTAHIST_D02012024.TXT",
            "COTAHIST_D03012024.TXT",
            "COTAHIST_A2023.ZIP",
            "COTAHIST_BAD.ZIP",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let files = discover_files(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["COTAHIST_A2023.ZIP", "COTAHIST_D02012024.ZIP", "COTAHIST_D03012024.TXT"]
        );
    }
}
