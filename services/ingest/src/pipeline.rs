//! Upload pipeline: validate, store, register, parse, extract, materialize.
//!
//! One upload is processed to completion before the call returns. If parsing
//! or materialization fails, the file row and the stored bytes are removed
//! again so no metadata-only file is left behind. A batch runs its uploads one
//! after another; a rejected file is reported and the rest still run.

use std::io::Cursor;
use std::sync::Arc;

use records::{FieldSynonyms, FileMetadata, NewUploadedFile, RecordStore, UploadedFile};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::IngestError;
use crate::materialize::materialize;
use crate::metadata::extract_metadata;
use crate::storage::{content_hash, BlobStorage};
use crate::table::{parse, Table};
use crate::validate::{extension_of, validate, UploadLimits};

/// A spreadsheet as received from the uploader.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub file: UploadedFile,
    pub records: usize,
}

/// A batch member that was rejected or failed to process.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub created: Vec<IngestOutcome>,
    pub errors: Vec<BatchFailure>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    storage: BlobStorage,
    limits: UploadLimits,
    synonyms: FieldSynonyms,
}

/// Validates and parses without storing anything. Used for dry runs.
pub fn inspect(
    bytes: &[u8],
    filename: &str,
    limits: &UploadLimits,
    synonyms: &FieldSynonyms,
) -> Result<(Table, FileMetadata), IngestError> {
    validate(&mut Cursor::new(bytes), filename, bytes.len() as u64, limits)?;
    let table = parse(bytes, filename)?;
    let metadata = extract_metadata(&table, synonyms);
    Ok((table, metadata))
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        storage: BlobStorage,
        limits: UploadLimits,
        synonyms: FieldSynonyms,
    ) -> Self {
        Self {
            store,
            storage,
            limits,
            synonyms,
        }
    }

    pub async fn ingest_upload(&self, upload: Upload) -> Result<IngestOutcome, IngestError> {
        let mut cursor = Cursor::new(upload.bytes.as_slice());
        validate(&mut cursor, &upload.name, upload.bytes.len() as u64, &self.limits)?;

        let file_id = Uuid::new_v4();
        let hash = content_hash(&upload.bytes);
        let storage_path = self
            .storage
            .save(file_id, &extension_of(&upload.name), &upload.bytes)
            .await?;

        let inserted = self
            .store
            .insert_file(NewUploadedFile {
                file_id,
                name: upload.name.clone(),
                description: upload.description,
                storage_path: storage_path.clone(),
                content_hash: hash.clone(),
                owner_id: upload.owner_id,
            })
            .await;
        if let Err(e) = inserted {
            self.storage.remove(&storage_path).await;
            return Err(e.into());
        }
        info!(%file_id, name = %upload.name, hash = %hash, "registered upload");

        match self.process(file_id, &upload.bytes, &upload.name).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(%file_id, error = %e, "processing failed, rolling back upload");
                if let Err(cleanup) = self.store.delete_file(file_id).await {
                    warn!(%file_id, error = %cleanup, "could not delete file row");
                }
                self.storage.remove(&storage_path).await;
                Err(e)
            }
        }
    }

    /// Ingests each upload in turn. Failures are collected per file and never
    /// stop the remaining uploads.
    pub async fn ingest_batch(&self, uploads: Vec<Upload>) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            total: uploads.len(),
            ..BatchOutcome::default()
        };
        for upload in uploads {
            let name = upload.name.clone();
            match self.ingest_upload(upload).await {
                Ok(created) => outcome.created.push(created),
                Err(e) => {
                    warn!(name = %name, error = %e, "batch upload rejected");
                    outcome.errors.push(BatchFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome.succeeded = outcome.created.len();
        outcome.failed = outcome.errors.len();
        info!(
            total = outcome.total,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "batch upload finished"
        );
        outcome
    }

    /// Re-reads the stored bytes and rebuilds metadata and records.
    pub async fn reprocess(&self, file_id: Uuid) -> Result<IngestOutcome, IngestError> {
        let file = self
            .store
            .get_file(file_id)
            .await?
            .ok_or(IngestError::FileNotFound(file_id))?;
        let bytes = self.storage.read(&file.storage_path).await?;
        self.process(file_id, &bytes, &file.name).await
    }

    /// Deletes a file, its records and its stored bytes. Only the owner may
    /// delete.
    pub async fn delete_file(&self, file_id: Uuid, requester: Uuid) -> Result<(), IngestError> {
        let file = self
            .store
            .get_file(file_id)
            .await?
            .ok_or(IngestError::FileNotFound(file_id))?;
        if file.owner_id != requester {
            return Err(IngestError::NotOwner(file_id));
        }
        self.store.delete_file(file_id).await?;
        self.storage.remove(&file.storage_path).await;
        info!(%file_id, "deleted file");
        Ok(())
    }

    async fn process(&self, file_id: Uuid, bytes: &[u8], name: &str) -> Result<IngestOutcome, IngestError> {
        let table = parse(bytes, name)?;
        let metadata = extract_metadata(&table, &self.synonyms);
        let records = materialize(self.store.as_ref(), file_id, &table, &self.synonyms).await?;
        let file = self.store.mark_processed(file_id, &metadata).await?;
        info!(
            %file_id,
            rows = metadata.row_count,
            columns = metadata.column_count,
            year = ?metadata.year,
            department = ?metadata.department,
            "processed upload"
        );
        Ok(IngestOutcome { file, records })
    }
}
