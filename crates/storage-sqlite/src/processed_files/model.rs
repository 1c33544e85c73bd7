//! Database model for ledger rows.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use cotahist_core::errors::{DatabaseError, Error};
use cotahist_core::files::ProcessedFile;
use cotahist_core::utils::time_utils::TIMESTAMP_FORMAT;

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::processed_files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProcessedFileDB {
    pub file_name: String,
    pub kind: String,
    pub processed_at: String,
    pub records_added: i64,
    pub content_hash: Option<String>,
}

impl From<ProcessedFile> for ProcessedFileDB {
    fn from(file: ProcessedFile) -> Self {
        Self {
            file_name: file.file_name,
            kind: file.kind,
            processed_at: file.processed_at.format(TIMESTAMP_FORMAT).to_string(),
            records_added: file.records_added,
            content_hash: file.content_hash,
        }
    }
}

impl TryFrom<ProcessedFileDB> for ProcessedFile {
    type Error = Error;

    fn try_from(row: ProcessedFileDB) -> Result<Self, Self::Error> {
        let processed_at = NaiveDateTime::parse_from_str(&row.processed_at, TIMESTAMP_FORMAT)
            .map_err(|e| {
                Error::Database(DatabaseError::Internal(format!(
                    "ledger row {} has an invalid timestamp {}: {}",
                    row.file_name, row.processed_at, e
                )))
            })?;

        Ok(ProcessedFile {
            file_name: row.file_name,
            kind: row.kind,
            processed_at,
            records_added: row.records_added,
            content_hash: row.content_hash,
        })
    }
}
