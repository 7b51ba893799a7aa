//! Persistence for uploaded files and their records.
//!
//! Two implementations share the [`RecordStore`] trait: [`PgStore`] for
//! PostgreSQL and [`MemoryStore`] for tests and dry runs. The materializer is
//! the only writer of records; the filter and aggregation engines only read.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::filter::{FileFilter, RecordQuery};
use crate::model::{FileMetadata, IndexedField, NewRecord, NewUploadedFile, Record, UploadedFile};
use crate::payload::Payload;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Registers a file as unprocessed.
    async fn insert_file(&self, file: NewUploadedFile) -> Result<UploadedFile, StoreError>;

    /// Writes the processed metadata and flags the file as processed.
    async fn mark_processed(
        &self,
        file_id: Uuid,
        metadata: &FileMetadata,
    ) -> Result<UploadedFile, StoreError>;

    async fn get_file(&self, file_id: Uuid) -> Result<Option<UploadedFile>, StoreError>;

    /// Files matching `filter`, newest upload first.
    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<UploadedFile>, StoreError>;

    /// Most recent upload, optionally restricted to one owner.
    async fn latest_file(&self, owner_id: Option<Uuid>) -> Result<Option<UploadedFile>, StoreError>;

    /// Deletes a file and, by cascade, its records. Returns false when the
    /// file did not exist.
    async fn delete_file(&self, file_id: Uuid) -> Result<bool, StoreError>;

    /// Atomically swaps the file's record set for `records`. Concurrent calls
    /// for the same file are serialized.
    async fn replace_records(
        &self,
        file_id: Uuid,
        records: Vec<NewRecord>,
    ) -> Result<usize, StoreError>;

    /// Records matching `query`, ordered by file upload time then row index.
    async fn find_records(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError>;

    /// Distinct non-null values of an indexed column, in ascending order.
    async fn distinct_indexed(
        &self,
        field: IndexedField,
        file_id: Option<Uuid>,
    ) -> Result<Vec<String>, StoreError>;

    /// Raw payloads, optionally scoped to one file.
    async fn payloads(&self, file_id: Option<Uuid>) -> Result<Vec<Payload>, StoreError>;

    /// Number of records, optionally scoped to one file.
    async fn count_records(&self, file_id: Option<Uuid>) -> Result<i64, StoreError>;
}
