//! Archive handling: sibling paths, extraction with retry and content hashing.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::errors::{ArchiveError, Result};

const HASH_BLOCK_SIZE: usize = 4096;

/// The compressed archive and extracted text that share a file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePair {
    pub archive: PathBuf,
    pub text: PathBuf,
}

impl ArchivePair {
    /// Derives both sibling paths from either member of the pair.
    ///
    /// Returns `None` when `path` is neither a `.ZIP` nor a `.TXT` file.
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_uppercase();
        if ext != "ZIP" && ext != "TXT" {
            return None;
        }
        Some(Self {
            archive: sibling(path, "ZIP"),
            text: sibling(path, "TXT"),
        })
    }

    pub fn has_archive(&self) -> bool {
        self.archive.is_file()
    }

    pub fn has_text(&self) -> bool {
        self.text.is_file()
    }
}

/// Path with the extension replaced, preferring an existing file whose
/// extension differs only by case.
fn sibling(path: &Path, ext: &str) -> PathBuf {
    let upper = path.with_extension(ext);
    if upper.exists() {
        return upper;
    }
    let lower = path.with_extension(ext.to_lowercase());
    if lower.exists() {
        lower
    } else {
        upper
    }
}

/// Returns the file name component as an owned string.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// SHA-256 of the file contents, hex encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];
    loop {
        let read = reader.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Extracts every file in `archive` into `dest`, retrying transient failures.
///
/// Corrupt or empty archives fail immediately with `BadArchive`.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    retries: u32,
    delay: Duration,
) -> Result<Vec<PathBuf>> {
    let attempts = retries.max(1);
    let mut attempt = 1;
    loop {
        match extract_once(archive, dest) {
            Ok(files) => {
                info!("Extracted {} file(s) from {}", files.len(), archive.display());
                return Ok(files);
            }
            Err(e @ ArchiveError::Extraction { .. }) if attempt < attempts => {
                warn!(
                    "Extraction attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, attempts, e, delay
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Extracts `archive` and returns the quote text file it contained.
pub fn extract_text(archive: &Path, dest: &Path, retries: u32, delay: Duration) -> Result<PathBuf> {
    extract_archive(archive, dest, retries, delay)?
        .into_iter()
        .find(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("txt"))
                .unwrap_or(false)
        })
        .ok_or_else(|| ArchiveError::MissingText(archive.display().to_string()).into())
}

fn extract_once(archive: &Path, dest: &Path) -> std::result::Result<Vec<PathBuf>, ArchiveError> {
    let display = archive.display().to_string();
    let io_failure = |e: io::Error| ArchiveError::Extraction {
        path: display.clone(),
        reason: e.to_string(),
    };

    let file = File::open(archive).map_err(io_failure)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| classify_zip_error(&display, e))?;
    if zip.len() == 0 {
        return Err(ArchiveError::BadArchive {
            path: display.clone(),
            reason: "archive is empty".to_string(),
        });
    }

    fs::create_dir_all(dest).map_err(io_failure)?;
    let mut extracted = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut member = zip.by_index(i).map_err(|e| classify_zip_error(&display, e))?;
        if member.is_dir() {
            continue;
        }
        let Some(relative) = member.enclosed_name() else {
            return Err(ArchiveError::BadArchive {
                path: display.clone(),
                reason: format!("unsafe member path {}", member.name()),
            });
        };
        let Some(name) = relative.file_name() else {
            continue;
        };
        let target = dest.join(name);
        let mut out = File::create(&target).map_err(io_failure)?;
        io::copy(&mut member, &mut out).map_err(io_failure)?;
        debug!("Extracted {} to {}", member.name(), target.display());
        extracted.push(target);
    }
    Ok(extracted)
}

fn classify_zip_error(path: &str, err: ZipError) -> ArchiveError {
    match err {
        ZipError::Io(e) => ArchiveError::Extraction {
            path: path.to_string(),
            reason: e.to_string(),
        },
        other => ArchiveError::BadArchive {
            path: path.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::Error;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_zip(path: &Path, member: &str, contents: &[u8]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer.start_file(member, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_archive_pair_from_either_side() {
        let pair = ArchivePair::for_path(Path::new("/data/COTAHIST_A2024.TXT")).unwrap();
        assert_eq!(pair.archive, PathBuf::from("/data/COTAHIST_A2024.ZIP"));
        assert_eq!(pair.text, PathBuf::from("/data/COTAHIST_A2024.TXT"));

        let pair = ArchivePair::for_path(Path::new("/data/COTAHIST_A2024.ZIP")).unwrap();
        assert_eq!(pair.text, PathBuf::from("/data/COTAHIST_A2024.TXT"));

        assert!(ArchivePair::for_path(Path::new("/data/COTAHIST_A2024.CSV")).is_none());
        assert!(ArchivePair::for_path(Path::new("/data/COTAHIST_A2024")).is_none());
    }

    #[test]
    fn test_hash_changes_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, b"first").unwrap();
        let first = hash_file(&path).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, hash_file(&path).unwrap());

        fs::write(&path, b"second").unwrap();
        assert_ne!(first, hash_file(&path).unwrap());
    }

    #[test]
    fn test_extract_text_from_archive() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("COTAHIST_D02012024.ZIP");
        write_zip(&zip_path, "COTAHIST_D02012024.TXT", b"00HEADER\n");

        let text = extract_text(&zip_path, dir.path(), 3, Duration::from_millis(1)).unwrap();
        assert_eq!(text, dir.path().join("COTAHIST_D02012024.TXT"));
        assert_eq!(fs::read(&text).unwrap(), b"00HEADER\n");
    }

    #[test]
    fn test_corrupt_archive_is_not_retried() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("COTAHIST_D02012024.ZIP");
        fs::write(&zip_path, b"this is not a zip file").unwrap();

        let started = std::time::Instant::now();
        let err = extract_archive(&zip_path, dir.path(), 3, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(
            err,
            Error::Archive(ArchiveError::BadArchive { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_empty_archive_is_bad() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("COTAHIST_D02012024.ZIP");
        let writer = zip::ZipWriter::new(File::create(&zip_path).unwrap());
        writer.finish().unwrap();

        let err = extract_archive(&zip_path, dir.path(), 1, Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            Error::Archive(ArchiveError::BadArchive { .. })
        ));
    }

    #[test]
    fn test_missing_archive_is_retried_then_fails() {
        let dir = tempdir().unwrap();
        let err = extract_archive(
            &dir.path().join("COTAHIST_A2020.ZIP"),
            dir.path(),
            2,
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Archive(ArchiveError::Extraction { .. })
        ));
    }

    #[test]
    fn test_archive_without_text_member() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("COTAHIST_A2020.ZIP");
        write_zip(&zip_path, "readme.md", b"nothing here");

        let err = extract_text(&zip_path, dir.path(), 1, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Archive(ArchiveError::MissingText(_))));
    }
}
