//! Adaptive sub-batch sizing for bulk quote inserts.

/// Estimated encoded size of one quote row, in bytes.
pub const DEFAULT_BYTES_PER_RECORD: usize = 100;

/// Batch size tiers used by the quote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizing {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
    /// Upper bound on the encoded size of one sub-batch.
    pub max_batch_bytes: usize,
    pub bytes_per_record: Option<usize>,
}

impl Default for BatchSizing {
    fn default() -> Self {
        Self {
            small: 1_000,
            medium: 5_000,
            large: 10_000,
            max_batch_bytes: 1024 * 1024,
            bytes_per_record: Some(DEFAULT_BYTES_PER_RECORD),
        }
    }
}

impl BatchSizing {
    /// Picks the sub-batch size for inserting `record_count` records.
    ///
    /// Small loads use the small tier. Larger loads are bounded by the byte
    /// budget when a per-record size is known, otherwise they fall into the
    /// medium or large tier by count.
    pub fn batch_size(&self, record_count: usize) -> usize {
        if record_count <= self.small {
            return self.small.max(1);
        }
        match self.bytes_per_record {
            Some(bytes) if bytes > 0 => (self.max_batch_bytes / bytes).clamp(1, self.large.max(1)),
            _ if record_count <= self.medium.saturating_mul(10) => self.medium.max(1),
            _ => self.large.max(1),
        }
    }

    pub fn without_byte_estimate(mut self) -> Self {
        self.bytes_per_record = None;
        self
    }
}
