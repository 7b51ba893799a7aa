use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::RecordStore;
use crate::error::StoreError;
use crate::filter::{FileFilter, RecordQuery};
use crate::model::{FileMetadata, IndexedField, NewRecord, NewUploadedFile, Record, UploadedFile};
use crate::payload::Payload;

/// Rows per multi-row INSERT; 8 binds per row keeps well under the
/// PostgreSQL bind limit.
const INSERT_CHUNK: usize = 1000;

const FILE_COLUMNS: &str = "file_id, name, description, storage_path, content_hash, owner_id, \
     uploaded_at, processed, columns, row_count, column_count, year, department";

/// Qualified with `r`, the alias of `records` in joined selects.
const RECORD_COLUMNS: &str = "r.record_id, r.file_id, r.row_index, r.payload, r.year, \
     r.department, r.indicator, r.value, r.created_at";

/// `records r` joined to its file so results can follow upload order.
const RECORDS_JOINED: &str = "records r JOIN uploaded_files f ON f.file_id = r.file_id";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Uploaded file row as stored in PostgreSQL
#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    file_id: Uuid,
    name: String,
    description: Option<String>,
    storage_path: String,
    content_hash: String,
    owner_id: Uuid,
    uploaded_at: DateTime<Utc>,
    processed: bool,
    columns: Json<Vec<String>>,
    row_count: i64,
    column_count: i64,
    year: Option<i32>,
    department: Option<String>,
}

impl From<FileRow> for UploadedFile {
    fn from(row: FileRow) -> Self {
        Self {
            file_id: row.file_id,
            name: row.name,
            description: row.description,
            storage_path: row.storage_path,
            content_hash: row.content_hash,
            owner_id: row.owner_id,
            uploaded_at: row.uploaded_at,
            processed: row.processed,
            columns: row.columns.0,
            row_count: row.row_count,
            column_count: row.column_count,
            year: row.year,
            department: row.department,
        }
    }
}

/// Record row as stored in PostgreSQL
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    record_id: Uuid,
    file_id: Uuid,
    row_index: i32,
    payload: Json<Payload>,
    year: Option<i32>,
    department: Option<String>,
    indicator: Option<String>,
    value: Option<f64>,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Self {
            record_id: row.record_id,
            file_id: row.file_id,
            row_index: row.row_index,
            payload: row.payload.0,
            year: row.year,
            department: row.department,
            indicator: row.indicator,
            value: row.value,
            created_at: row.created_at,
        }
    }
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Appends the WHERE clause for `query` to a select over `records r`.
fn push_record_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &RecordQuery) {
    qb.push(" WHERE TRUE");
    if let Some(file_id) = query.file_id {
        qb.push(" AND r.file_id = ").push_bind(file_id);
    }
    if let Some(year) = &query.year_contains {
        qb.push(" AND strpos(r.year::text, ").push_bind(year.clone()).push(") > 0");
    }
    if let Some(department) = &query.department_contains {
        qb.push(" AND strpos(lower(r.department), ")
            .push_bind(department.clone())
            .push(") > 0");
    }
    if let Some(indicator) = &query.indicator_contains {
        qb.push(" AND strpos(lower(r.indicator), ")
            .push_bind(indicator.clone())
            .push(") > 0");
    }
    for predicate in &query.payload_contains {
        qb.push(" AND r.payload ? ").push_bind(predicate.key.clone());
        qb.push(" AND strpos(lower(r.payload ->> ")
            .push_bind(predicate.key.clone())
            .push("), ")
            .push_bind(predicate.needle.clone())
            .push(") > 0");
    }
}

fn select_records(query: &RecordQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM {RECORDS_JOINED}"));
    push_record_filters(&mut qb, query);
    qb.push(" ORDER BY f.uploaded_at, r.file_id, r.row_index");
    qb
}

fn select_files(filter: &FileFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {FILE_COLUMNS} FROM uploaded_files WHERE TRUE"));
    if let Some(year) = filter.year {
        qb.push(" AND year = ").push_bind(year);
    }
    if let Some(department) = filter.department_needle() {
        qb.push(" AND strpos(lower(department), ")
            .push_bind(department)
            .push(") > 0");
    }
    if let Some(owner_id) = filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id);
    }
    qb.push(" ORDER BY uploaded_at DESC");
    qb
}

/// Casts to text only in the outer select so ordering stays on the typed
/// column (numeric for year and value).
fn distinct_sql(column: &str) -> String {
    format!(
        r#"
        SELECT d.v::text FROM (
            SELECT DISTINCT {column} AS v FROM records
            WHERE {column} IS NOT NULL AND ($1::uuid IS NULL OR file_id = $1)
        ) d
        ORDER BY d.v
        "#
    )
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert_file(&self, file: NewUploadedFile) -> Result<UploadedFile, StoreError> {
        let row: FileRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO uploaded_files (file_id, name, description, storage_path, content_hash, owner_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(file.file_id)
        .bind(&file.name)
        .bind(&file.description)
        .bind(&file.storage_path)
        .bind(&file.content_hash)
        .bind(file.owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn mark_processed(
        &self,
        file_id: Uuid,
        metadata: &FileMetadata,
    ) -> Result<UploadedFile, StoreError> {
        let row: Option<FileRow> = sqlx::query_as(&format!(
            r#"
            UPDATE uploaded_files
            SET processed = TRUE, row_count = $2, column_count = $3, columns = $4,
                year = $5, department = $6
            WHERE file_id = $1
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(file_id)
        .bind(metadata.row_count)
        .bind(metadata.column_count)
        .bind(Json(&metadata.columns))
        .bind(metadata.year)
        .bind(&metadata.department)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UploadedFile::from)
            .ok_or(StoreError::FileNotFound(file_id))
    }

    async fn get_file(&self, file_id: Uuid) -> Result<Option<UploadedFile>, StoreError> {
        let row: Option<FileRow> = sqlx::query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM uploaded_files WHERE file_id = $1"
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UploadedFile::from))
    }

    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<UploadedFile>, StoreError> {
        let rows: Vec<FileRow> = select_files(filter)
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(UploadedFile::from).collect())
    }

    async fn latest_file(&self, owner_id: Option<Uuid>) -> Result<Option<UploadedFile>, StoreError> {
        let row: Option<FileRow> = sqlx::query_as(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM uploaded_files
            WHERE ($1::uuid IS NULL OR owner_id = $1)
            ORDER BY uploaded_at DESC
            LIMIT 1
            "#
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UploadedFile::from))
    }

    async fn delete_file(&self, file_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM uploaded_files WHERE file_id = $1")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_records(
        &self,
        file_id: Uuid,
        records: Vec<NewRecord>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the parent file serializes re-materializations of it.
        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT file_id FROM uploaded_files WHERE file_id = $1 FOR UPDATE")
                .bind(file_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::FileNotFound(file_id));
        }

        let deleted = sqlx::query("DELETE FROM records WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        debug!(%file_id, deleted, "cleared previous records");

        for chunk in records.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO records (record_id, file_id, row_index, payload, year, department, indicator, value) ",
            );
            qb.push_values(chunk, |mut row, record| {
                let fields = record.fields();
                row.push_bind(Uuid::new_v4())
                    .push_bind(file_id)
                    .push_bind(record.row_index())
                    .push_bind(Json(record.payload().clone()))
                    .push_bind(fields.year)
                    .push_bind(fields.department.clone())
                    .push_bind(fields.indicator.clone())
                    .push_bind(fields.value);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    async fn find_records(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        let rows: Vec<RecordRow> = select_records(query)
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Record::from).collect())
    }

    async fn distinct_indexed(
        &self,
        field: IndexedField,
        file_id: Option<Uuid>,
    ) -> Result<Vec<String>, StoreError> {
        // Column names come from a closed enum, never from the caller.
        let rows: Vec<(Option<String>,)> = sqlx::query_as(&distinct_sql(field.column()))
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().filter_map(|(v,)| v).collect())
    }

    async fn payloads(&self, file_id: Option<Uuid>) -> Result<Vec<Payload>, StoreError> {
        let rows: Vec<(Json<Payload>,)> = sqlx::query_as(&format!(
            r#"
            SELECT r.payload FROM {RECORDS_JOINED}
            WHERE ($1::uuid IS NULL OR r.file_id = $1)
            ORDER BY f.uploaded_at, r.file_id, r.row_index
            "#
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p.0).collect())
    }

    async fn count_records(&self, file_id: Option<Uuid>) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM records WHERE ($1::uuid IS NULL OR file_id = $1)")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
