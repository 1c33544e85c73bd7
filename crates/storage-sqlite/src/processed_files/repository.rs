use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;
use std::sync::Arc;

use super::model::ProcessedFileDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::processed_files::dsl as processed_files_dsl;
use cotahist_core::files::{ProcessedFile, ProcessedFileStore};
use cotahist_core::utils::retry::{retry_on_lock, LockRetryPolicy};
use cotahist_core::{IngestConfig, Result};

pub struct ProcessedFileRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    lock_retry: LockRetryPolicy,
}

impl ProcessedFileRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self {
            pool,
            writer,
            lock_retry: LockRetryPolicy::default(),
        }
    }

    pub fn from_config(pool: Arc<DbPool>, writer: WriteHandle, config: &IngestConfig) -> Self {
        Self::new(pool, writer).with_lock_retry(config.lock_retry)
    }

    pub fn with_lock_retry(mut self, lock_retry: LockRetryPolicy) -> Self {
        self.lock_retry = lock_retry;
        self
    }
}

#[async_trait]
impl ProcessedFileStore for ProcessedFileRepository {
    async fn upsert(&self, file: ProcessedFile) -> Result<()> {
        let row = ProcessedFileDB::from(file);
        retry_on_lock(self.lock_retry, "register_processed_file", || {
            let writer = self.writer.clone();
            let row = row.clone();
            async move {
                writer
                    .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                        diesel::replace_into(processed_files_dsl::processed_files)
                            .values(&row)
                            .execute(conn)
                            .map_err(StorageError::QueryFailed)?;
                        Ok(())
                    })
                    .await
            }
        })
        .await?;
        debug!("Stored ledger row {}", row.file_name);
        Ok(())
    }

    fn get(&self, file_name: &str) -> Result<Option<ProcessedFile>> {
        let mut conn = get_connection(&self.pool)?;
        processed_files_dsl::processed_files
            .find(file_name)
            .select(ProcessedFileDB::as_select())
            .first::<ProcessedFileDB>(&mut conn)
            .optional()
            .into_core()?
            .map(ProcessedFile::try_from)
            .transpose()
    }

    fn list(&self) -> Result<Vec<ProcessedFile>> {
        let mut conn = get_connection(&self.pool)?;
        processed_files_dsl::processed_files
            .order((processed_files_dsl::kind.asc(), processed_files_dsl::file_name.asc()))
            .select(ProcessedFileDB::as_select())
            .load::<ProcessedFileDB>(&mut conn)
            .into_core()?
            .into_iter()
            .map(ProcessedFile::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn processed(name: &str, kind: &str, records: i64, hash: &str) -> ProcessedFile {
        ProcessedFile {
            file_name: name.to_string(),
            kind: kind.to_string(),
            processed_at: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap(),
            records_added: records,
            content_hash: Some(hash.to_string()),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_row_with_same_name() {
        let dir = tempdir().unwrap();
        let (pool, writer) = db::open(dir.path().join("ledger.db").to_str().unwrap()).unwrap();
        let repo = ProcessedFileRepository::new(pool, writer);

        assert_eq!(repo.get("COTAHIST_A2023.ZIP").unwrap(), None);

        repo.upsert(processed("COTAHIST_A2023.ZIP", "annual", 100, "aaa"))
            .await
            .unwrap();
        repo.upsert(processed("COTAHIST_A2023.ZIP", "annual", 120, "bbb"))
            .await
            .unwrap();

        let row = repo.get("COTAHIST_A2023.ZIP").unwrap().unwrap();
        assert_eq!(row.records_added, 120);
        assert_eq!(row.content_hash.as_deref(), Some("bbb"));
        assert_eq!(row, processed("COTAHIST_A2023.ZIP", "annual", 120, "bbb"));
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_from_config_applies_lock_retry() {
        let dir = tempdir().unwrap();
        let (pool, writer) = db::open(dir.path().join("ledger.db").to_str().unwrap()).unwrap();
        let config = IngestConfig {
            lock_retry: LockRetryPolicy {
                max_attempts: 6,
                delay: std::time::Duration::from_millis(5),
            },
            ..IngestConfig::default()
        };

        let repo = ProcessedFileRepository::from_config(pool, writer, &config);

        assert_eq!(repo.lock_retry, config.lock_retry);
    }

    #[tokio::test]
    async fn test_list_orders_by_kind_then_name() {
        let dir = tempdir().unwrap();
        let (pool, writer) = db::open(dir.path().join("ledger.db").to_str().unwrap()).unwrap();
        let repo = ProcessedFileRepository::new(pool, writer);

        for (name, kind) in [
            ("COTAHIST_M022024.ZIP", "monthly"),
            ("COTAHIST_D03012024.ZIP", "daily"),
            ("COTAHIST_A2023.ZIP", "annual"),
            ("COTAHIST_D02012024.ZIP", "daily"),
        ] {
            repo.upsert(processed(name, kind, 1, "h")).await.unwrap();
        }

        let names: Vec<String> = repo.list().unwrap().into_iter().map(|f| f.file_name).collect();
        assert_eq!(
            names,
            vec![
                "COTAHIST_A2023.ZIP",
                "COTAHIST_D02012024.ZIP",
                "COTAHIST_D03012024.ZIP",
                "COTAHIST_M022024.ZIP",
            ]
        );
    }
}
