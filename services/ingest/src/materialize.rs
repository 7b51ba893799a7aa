use records::{FieldSynonyms, NewRecord, RecordStore};
use tracing::info;
use uuid::Uuid;

use crate::error::IngestError;
use crate::table::Table;

/// Builds one record per table row, numbered from 1.
pub fn build_records(table: &Table, synonyms: &FieldSynonyms) -> Result<Vec<NewRecord>, IngestError> {
    if i32::try_from(table.row_count()).is_err() {
        return Err(IngestError::TooManyRows(table.row_count()));
    }
    Ok((0..table.row_count())
        .filter_map(|i| {
            let payload = table.row_payload(i)?;
            Some(NewRecord::new(i as i32 + 1, payload, synonyms))
        })
        .collect())
}

/// Replaces every record of `file_id` with the rows of `table`.
pub async fn materialize(
    store: &dyn RecordStore,
    file_id: Uuid,
    table: &Table,
    synonyms: &FieldSynonyms,
) -> Result<usize, IngestError> {
    let records = build_records(table, synonyms)?;
    let count = store.replace_records(file_id, records).await?;
    info!(%file_id, records = count, "materialized records");
    Ok(count)
}
