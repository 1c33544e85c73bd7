//! Chunked parallel parsing of large quote files.
//!
//! A file is streamed once; only lines passing the cheap record-type and
//! class-code filter are kept. A chunk is closed every `chunk_lines` lines
//! *read*, so chunk boundaries depend on file position rather than on how
//! many lines matched. Chunks are parsed on a short-lived rayon pool and the
//! results are gathered in completion order.
//!
//! Only owned line buffers cross into the pool. The file handle is closed
//! before dispatch and the scheduler never touches the store.

use std::any::Any;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use log::{debug, error, info};
use rayon::ThreadPoolBuilder;

use crate::config::IngestConfig;
use crate::errors::{Error, Result};
use crate::quotes::{QuoteRecord, RecordParser};

/// One pre-filtered group of raw lines.
pub type Chunk = Vec<Vec<u8>>;

/// Work applied to each chunk inside the pool.
pub type ChunkWorker = dyn Fn(usize, &[Vec<u8>]) -> std::result::Result<Vec<QuoteRecord>, String>
    + Send
    + Sync;

/// Chunks are logged every this many completions.
const PROGRESS_EVERY: usize = 10;

/// Lines of a file split into chunks.
#[derive(Debug, Default)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    pub lines_read: usize,
    pub candidate_lines: usize,
}

/// A chunk whose worker failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub index: usize,
    pub reason: String,
}

/// Reduced result of a scheduled file.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub records: Vec<QuoteRecord>,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub failures: Vec<ChunkFailure>,
    pub workers: usize,
}

impl ChunkOutcome {
    pub fn chunks_failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct ChunkScheduler {
    parser: RecordParser,
    worker_count: usize,
    chunk_lines: usize,
    worker: Arc<ChunkWorker>,
}

impl ChunkScheduler {
    pub fn new(parser: RecordParser, worker_count: usize, chunk_lines: usize) -> Self {
        let chunk_parser = parser.clone();
        Self {
            parser,
            worker_count: worker_count.max(1),
            chunk_lines: chunk_lines.max(1),
            worker: Arc::new(
                move |_: usize, lines: &[Vec<u8>]| -> std::result::Result<Vec<QuoteRecord>, String> {
                    Ok(parse_lines(&chunk_parser, lines))
                },
            ),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            RecordParser::new(&config.target_class_code),
            config.worker_count,
            config.chunk_lines,
        )
    }

    /// Replaces the per-chunk work.
    pub fn with_worker<F>(mut self, worker: F) -> Self
    where
        F: Fn(usize, &[Vec<u8>]) -> std::result::Result<Vec<QuoteRecord>, String>
            + Send
            + Sync
            + 'static,
    {
        self.worker = Arc::new(worker);
        self
    }

    pub fn parser(&self) -> &RecordParser {
        &self.parser
    }

    /// Streams `path` into pre-filtered chunks.
    pub fn plan(&self, path: &Path) -> Result<ChunkPlan> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut plan = ChunkPlan::default();
        let mut current: Chunk = Vec::new();
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = trim_line_ending(&buf);
            if self.parser.is_candidate(line) {
                current.push(line.to_vec());
                plan.candidate_lines += 1;
            }
            if plan.lines_read % self.chunk_lines == self.chunk_lines - 1 && !current.is_empty() {
                plan.chunks.push(std::mem::take(&mut current));
            }
            plan.lines_read += 1;
        }
        if !current.is_empty() {
            plan.chunks.push(current);
        }

        debug!(
            "Planned {} chunks from {} ({} of {} lines matched)",
            plan.chunks.len(),
            path.display(),
            plan.candidate_lines,
            plan.lines_read
        );
        Ok(plan)
    }

    /// Splits `path` into chunks and parses them in parallel.
    pub fn run(&self, path: &Path) -> Result<ChunkOutcome> {
        let plan = self.plan(path)?;
        self.run_chunks(plan.chunks)
    }

    /// Parses `chunks` on a pool of `min(worker_count, chunks)` threads.
    ///
    /// A chunk whose worker errors or panics contributes no records and is
    /// reported in `failures`; the remaining chunks are still collected.
    pub fn run_chunks(&self, chunks: Vec<Chunk>) -> Result<ChunkOutcome> {
        let total = chunks.len();
        let workers = self.worker_count.min(total).max(1);
        let mut outcome = ChunkOutcome {
            chunks_total: total,
            workers,
            ..ChunkOutcome::default()
        };
        if total == 0 {
            return Ok(outcome);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("chunk-worker-{}", i))
            .build()
            .map_err(|e| Error::Unexpected(format!("Failed to start chunk pool: {}", e)))?;
        info!("Dispatching {} chunks to {} workers", total, workers);

        let (tx, rx) = mpsc::channel();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let tx = tx.clone();
            let worker = Arc::clone(&self.worker);
            pool.spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| worker(index, &chunk)))
                    .unwrap_or_else(|payload| Err(panic_message(payload)));
                // The receiver only goes away if the orchestrator bailed out.
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        for (completed, (index, result)) in rx.iter().enumerate() {
            match result {
                Ok(mut records) => {
                    outcome.chunks_succeeded += 1;
                    outcome.records.append(&mut records);
                }
                Err(reason) => {
                    error!("Chunk {} failed: {}", index, reason);
                    outcome.failures.push(ChunkFailure { index, reason });
                }
            }
            let done = completed + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                info!(
                    "Progress: {}/{} chunks ({} records so far)",
                    done,
                    total,
                    outcome.records.len()
                );
            }
        }

        if !outcome.failures.is_empty() {
            error!(
                "{} of {} chunks failed; their records were not collected",
                outcome.chunks_failed(),
                total
            );
        }
        Ok(outcome)
    }

    /// Parses a file sequentially on the calling thread.
    pub fn parse_sequential(&self, path: &Path) -> Result<Vec<QuoteRecord>> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            if let Some(record) = self.parser.parse(trim_line_ending(&buf)) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Applies the parser to every line of a chunk.
pub fn parse_lines(parser: &RecordParser, lines: &[Vec<u8>]) -> Vec<QuoteRecord> {
    lines.iter().filter_map(|line| parser.parse(line)).collect()
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", msg)
    } else {
        "worker panicked".to_string()
    }
}
