use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::RecordStore;
use crate::error::StoreError;
use crate::filter::{FileFilter, RecordQuery};
use crate::model::{FileMetadata, IndexedField, NewRecord, NewUploadedFile, Record, UploadedFile};
use crate::payload::Payload;

/// In-process store. Files keep insertion order so that equal upload
/// timestamps still resolve "latest" to the last inserted file.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    files: Vec<UploadedFile>,
    records: HashMap<Uuid, Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_file(&self, file: NewUploadedFile) -> Result<UploadedFile, StoreError> {
        let stored = UploadedFile {
            file_id: file.file_id,
            name: file.name,
            description: file.description,
            storage_path: file.storage_path,
            content_hash: file.content_hash,
            owner_id: file.owner_id,
            uploaded_at: Utc::now(),
            processed: false,
            columns: Vec::new(),
            row_count: 0,
            column_count: 0,
            year: None,
            department: None,
        };
        let mut state = self.state.write().await;
        state.files.push(stored.clone());
        Ok(stored)
    }

    async fn mark_processed(
        &self,
        file_id: Uuid,
        metadata: &FileMetadata,
    ) -> Result<UploadedFile, StoreError> {
        let mut state = self.state.write().await;
        let file = state
            .files
            .iter_mut()
            .find(|f| f.file_id == file_id)
            .ok_or(StoreError::FileNotFound(file_id))?;
        file.processed = true;
        file.row_count = metadata.row_count;
        file.column_count = metadata.column_count;
        file.columns = metadata.columns.clone();
        file.year = metadata.year;
        file.department = metadata.department.clone();
        Ok(file.clone())
    }

    async fn get_file(&self, file_id: Uuid) -> Result<Option<UploadedFile>, StoreError> {
        let state = self.state.read().await;
        Ok(state.files.iter().find(|f| f.file_id == file_id).cloned())
    }

    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<UploadedFile>, StoreError> {
        let state = self.state.read().await;
        let mut files: Vec<_> = state
            .files
            .iter()
            .rev()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(files)
    }

    async fn latest_file(&self, owner_id: Option<Uuid>) -> Result<Option<UploadedFile>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .files
            .iter()
            .filter(|f| owner_id.map_or(true, |owner| f.owner_id == owner))
            .max_by_key(|f| f.uploaded_at)
            .cloned())
    }

    async fn delete_file(&self, file_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.files.len();
        state.files.retain(|f| f.file_id != file_id);
        state.records.remove(&file_id);
        Ok(state.files.len() != before)
    }

    async fn replace_records(
        &self,
        file_id: Uuid,
        records: Vec<NewRecord>,
    ) -> Result<usize, StoreError> {
        // Held across the swap so two materializations never interleave.
        let mut state = self.state.write().await;
        if !state.files.iter().any(|f| f.file_id == file_id) {
            return Err(StoreError::FileNotFound(file_id));
        }
        let mut rows: Vec<Record> = records
            .into_iter()
            .map(|r| Record::from_new(file_id, r))
            .collect();
        rows.sort_by_key(|r| r.row_index);
        let count = rows.len();
        state.records.insert(file_id, rows);
        Ok(count)
    }

    async fn find_records(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        let state = self.state.read().await;
        let mut found = Vec::new();
        // Walk files in upload order so cross-file results are stable.
        for file in &state.files {
            if query.file_id.is_some_and(|id| id != file.file_id) {
                continue;
            }
            if let Some(rows) = state.records.get(&file.file_id) {
                found.extend(rows.iter().filter(|r| query.matches(r)).cloned());
            }
        }
        Ok(found)
    }

    async fn distinct_indexed(
        &self,
        field: IndexedField,
        file_id: Option<Uuid>,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        let rows = state
            .records
            .iter()
            .filter(|(id, _)| file_id.map_or(true, |wanted| **id == wanted))
            .flat_map(|(_, rows)| rows.iter());

        let values = match field {
            IndexedField::Year => {
                let mut years: Vec<i32> = rows.filter_map(|r| r.year).collect();
                years.sort_unstable();
                years.dedup();
                years.into_iter().map(|y| y.to_string()).collect()
            }
            IndexedField::Value => {
                let mut values: Vec<f64> = rows.filter_map(|r| r.value).collect();
                values.sort_by(f64::total_cmp);
                values.dedup();
                values.into_iter().map(|v| v.to_string()).collect()
            }
            IndexedField::Department | IndexedField::Indicator => {
                let mut texts: Vec<String> = rows.filter_map(|r| r.indexed_text(field)).collect();
                texts.sort();
                texts.dedup();
                texts
            }
        };
        Ok(values)
    }

    async fn payloads(&self, file_id: Option<Uuid>) -> Result<Vec<Payload>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .files
            .iter()
            .filter(|f| file_id.map_or(true, |wanted| f.file_id == wanted))
            .filter_map(|f| state.records.get(&f.file_id))
            .flat_map(|rows| rows.iter().map(|r| r.payload.clone()))
            .collect())
    }

    async fn count_records(&self, file_id: Option<Uuid>) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|(id, _)| file_id.map_or(true, |wanted| **id == wanted))
            .map(|(_, rows)| rows.len() as i64)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Scalar;
    use crate::synonyms::FieldSynonyms;

    fn new_file(owner_id: Uuid) -> NewUploadedFile {
        let file_id = Uuid::new_v4();
        NewUploadedFile {
            file_id,
            name: format!("{}.xlsx", file_id),
            description: None,
            storage_path: format!("/tmp/{}.xlsx", file_id),
            content_hash: "sha256:00".to_string(),
            owner_id,
        }
    }

    fn row(index: i32, dependencia: &str) -> NewRecord {
        let payload: Payload = vec![("Dependencia", Scalar::from(dependencia))].into_iter().collect();
        NewRecord::new(index, payload, &FieldSynonyms::default())
    }

    #[tokio::test]
    async fn test_replace_records_swaps_whole_set() {
        let store = MemoryStore::new();
        let file = store.insert_file(new_file(Uuid::new_v4())).await.unwrap();

        store
            .replace_records(file.file_id, vec![row(1, "A"), row(2, "B"), row(3, "C")])
            .await
            .unwrap();
        let count = store
            .replace_records(file.file_id, vec![row(1, "X")])
            .await
            .unwrap();

        assert_eq!(count, 1);
        let records = store
            .find_records(&RecordQuery::for_file(file.file_id))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].department.as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn test_replace_records_unknown_file() {
        let store = MemoryStore::new();
        let err = store.replace_records(Uuid::new_v4(), vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_file_cascades() {
        let store = MemoryStore::new();
        let file = store.insert_file(new_file(Uuid::new_v4())).await.unwrap();
        store.replace_records(file.file_id, vec![row(1, "A")]).await.unwrap();

        assert!(store.delete_file(file.file_id).await.unwrap());
        assert!(!store.delete_file(file.file_id).await.unwrap());
        assert_eq!(store.count_records(None).await.unwrap(), 0);
        assert!(store.get_file(file.file_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_file_with_and_without_owner() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let first = store.insert_file(new_file(alice)).await.unwrap();
        let second = store.insert_file(new_file(bob)).await.unwrap();

        let latest = store.latest_file(None).await.unwrap().unwrap();
        assert_eq!(latest.file_id, second.file_id);

        let alices = store.latest_file(Some(alice)).await.unwrap().unwrap();
        assert_eq!(alices.file_id, first.file_id);

        assert!(store.latest_file(Some(Uuid::new_v4())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_files_filters_newest_first() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let salud = store.insert_file(new_file(alice)).await.unwrap();
        let obras = store.insert_file(new_file(bob)).await.unwrap();
        let salud_2022 = store.insert_file(new_file(alice)).await.unwrap();
        for (file_id, year, department) in [
            (salud.file_id, 2023, "Secretaría de Salud"),
            (obras.file_id, 2023, "Obras Públicas"),
            (salud_2022.file_id, 2022, "Salud"),
        ] {
            let metadata = FileMetadata {
                year: Some(year),
                department: Some(department.to_string()),
                ..FileMetadata::default()
            };
            store.mark_processed(file_id, &metadata).await.unwrap();
        }
        let ids = |files: Vec<UploadedFile>| files.into_iter().map(|f| f.file_id).collect::<Vec<_>>();

        let all = store.list_files(&FileFilter::default()).await.unwrap();
        assert_eq!(ids(all), vec![salud_2022.file_id, obras.file_id, salud.file_id]);

        let by_department = FileFilter {
            department: Some("salud".to_string()),
            ..FileFilter::default()
        };
        let found = store.list_files(&by_department).await.unwrap();
        assert_eq!(ids(found), vec![salud_2022.file_id, salud.file_id]);

        let by_year_and_owner = FileFilter {
            year: Some(2023),
            owner_id: Some(alice),
            ..FileFilter::default()
        };
        let found = store.list_files(&by_year_and_owner).await.unwrap();
        assert_eq!(ids(found), vec![salud.file_id]);
    }

    #[tokio::test]
    async fn test_find_records_walks_files_in_upload_order() {
        let store = MemoryStore::new();
        let older = store.insert_file(new_file(Uuid::new_v4())).await.unwrap();
        let newer = store.insert_file(new_file(Uuid::new_v4())).await.unwrap();
        store.replace_records(newer.file_id, vec![row(1, "B1"), row(2, "B2")]).await.unwrap();
        store.replace_records(older.file_id, vec![row(1, "A1")]).await.unwrap();

        let records = store.find_records(&RecordQuery::default()).await.unwrap();
        let departments: Vec<_> = records.iter().filter_map(|r| r.department.as_deref()).collect();
        assert_eq!(departments, vec!["A1", "B1", "B2"]);
    }

    #[tokio::test]
    async fn test_distinct_indexed_sorted_without_nulls() {
        let store = MemoryStore::new();
        let file = store.insert_file(new_file(Uuid::new_v4())).await.unwrap();
        let empty: Payload = vec![("Otro", Scalar::Int(1))].into_iter().collect();
        store
            .replace_records(
                file.file_id,
                vec![
                    row(1, "Salud"),
                    row(2, "Educación"),
                    row(3, "Salud"),
                    NewRecord::new(4, empty, &FieldSynonyms::default()),
                ],
            )
            .await
            .unwrap();

        let values = store
            .distinct_indexed(IndexedField::Department, Some(file.file_id))
            .await
            .unwrap();
        assert_eq!(values, vec!["Educación", "Salud"]);
    }
}
