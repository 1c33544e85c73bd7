//! Runtime configuration for the ingestion pipeline.
//!
//! `IngestConfig` is built once at process start and handed to the services
//! that need it. Defaults can be overridden through `COTAHIST_*` environment
//! variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::quotes::BatchSizing;
use crate::utils::retry::LockRetryPolicy;

/// Total lines read before a chunk is closed.
pub const DEFAULT_CHUNK_LINES: usize = 100_000;

/// Instrument-class code of real estate investment funds (FII).
pub const DEFAULT_TARGET_CLASS_CODE: &str = "12";

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_DB_FILE: &str = "quotes.db";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory holding downloaded archives and extracted working copies.
    pub data_dir: PathBuf,
    /// SQLite database location.
    pub database_url: String,
    /// Upper bound on parallel chunk workers.
    pub worker_count: usize,
    pub chunk_lines: usize,
    pub target_class_code: String,
    pub lock_retry: LockRetryPolicy,
    pub batch_sizing: BatchSizing,
    pub extract_retries: u32,
    pub extract_retry_delay: Duration,
    /// Delete the extracted text once its archive has been registered.
    pub remove_working_copy: bool,
    pub cache_default_ttl: Duration,
    pub cache_default_max_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        let database_url = data_dir.join(DEFAULT_DB_FILE).to_string_lossy().to_string();
        Self {
            data_dir,
            database_url,
            worker_count: default_worker_count(),
            chunk_lines: DEFAULT_CHUNK_LINES,
            target_class_code: DEFAULT_TARGET_CLASS_CODE.to_string(),
            lock_retry: LockRetryPolicy::default(),
            batch_sizing: BatchSizing::default(),
            extract_retries: 3,
            extract_retry_delay: Duration::from_secs(2),
            remove_working_copy: true,
            cache_default_ttl: Duration::from_secs(300),
            cache_default_max_size: 1000,
        }
    }
}

impl IngestConfig {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("COTAHIST_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.database_url = config
                .data_dir
                .join(DEFAULT_DB_FILE)
                .to_string_lossy()
                .to_string();
        }
        if let Some(url) = lookup("COTAHIST_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            config.database_url = url;
        }
        if let Some(workers) = parse_var::<usize, _>(&lookup, "COTAHIST_WORKERS")? {
            config.worker_count = workers.max(1);
        }
        if let Some(lines) = parse_var::<usize, _>(&lookup, "COTAHIST_CHUNK_LINES")? {
            if lines == 0 {
                return Err(Error::InvalidConfigValue(
                    "COTAHIST_CHUNK_LINES must be greater than zero".to_string(),
                ));
            }
            config.chunk_lines = lines;
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "COTAHIST_LOCK_RETRIES")? {
            config.lock_retry.max_attempts = attempts.max(1);
        }
        if let Some(secs) = parse_var::<f64, _>(&lookup, "COTAHIST_LOCK_RETRY_DELAY_SECS")? {
            config.lock_retry.delay = duration_from_secs(secs, "COTAHIST_LOCK_RETRY_DELAY_SECS")?;
        }
        if let Some(small) = parse_var::<usize, _>(&lookup, "COTAHIST_BATCH_SMALL")? {
            config.batch_sizing.small = small.max(1);
        }
        if let Some(medium) = parse_var::<usize, _>(&lookup, "COTAHIST_BATCH_MEDIUM")? {
            config.batch_sizing.medium = medium.max(1);
        }
        if let Some(large) = parse_var::<usize, _>(&lookup, "COTAHIST_BATCH_LARGE")? {
            config.batch_sizing.large = large.max(1);
        }
        if let Some(bytes) = parse_var::<usize, _>(&lookup, "COTAHIST_MAX_BATCH_BYTES")? {
            config.batch_sizing.max_batch_bytes = bytes.max(1);
        }
        if let Some(keep) = parse_var::<bool, _>(&lookup, "COTAHIST_KEEP_TEXT")? {
            config.remove_working_copy = !keep;
        }

        Ok(config)
    }

    /// Creates the data directory when it does not exist yet.
    pub fn ensure_data_dir(&self) -> Result<&Path> {
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir)?;
        }
        Ok(&self.data_dir)
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::InvalidConfigValue(format!("{}={}", key, raw))),
    }
}

fn duration_from_secs(secs: f64, key: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::InvalidConfigValue(format!("{}={}", key, secs)))
}
