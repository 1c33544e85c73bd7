//! Interface of the collaborator that downloads archives from the exchange.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::Result;
use crate::files::PeriodKind;

/// Downloads published COTAHIST archives.
///
/// Network access, TLS and HTTP retries live behind this trait.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Whether the archive for the period has been published.
    async fn file_available(
        &self,
        kind: PeriodKind,
        day: Option<u32>,
        month: Option<u32>,
        year: i32,
    ) -> bool;

    /// Downloads `file_name` and returns the local archive path.
    async fn fetch(&self, file_name: &str) -> Result<PathBuf>;
}
