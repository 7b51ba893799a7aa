use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::{extract_fields, ExtractedFields};
use crate::payload::Payload;
use crate::synonyms::FieldSynonyms;

/// Metadata row for one uploaded spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub storage_path: String,
    pub content_hash: String,
    pub owner_id: Uuid,
    pub uploaded_at: DateTime<Utc>,
    pub processed: bool,
    pub columns: Vec<String>,
    pub row_count: i64,
    pub column_count: i64,
    pub year: Option<i32>,
    pub department: Option<String>,
}

/// Values known at upload time, before the file is processed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUploadedFile {
    pub file_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub storage_path: String,
    pub content_hash: String,
    pub owner_id: Uuid,
}

/// Written once by the ingestion pipeline when a file has been processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub row_count: i64,
    pub column_count: i64,
    pub columns: Vec<String>,
    pub year: Option<i32>,
    pub department: Option<String>,
}

/// One materialized spreadsheet row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: Uuid,
    pub file_id: Uuid,
    pub row_index: i32,
    pub payload: Payload,
    pub year: Option<i32>,
    pub department: Option<String>,
    pub indicator: Option<String>,
    pub value: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    pub(crate) fn from_new(file_id: Uuid, new: NewRecord) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            file_id,
            row_index: new.row_index,
            payload: new.payload,
            year: new.fields.year,
            department: new.fields.department,
            indicator: new.fields.indicator,
            value: new.fields.value,
            created_at: Utc::now(),
        }
    }

    /// Stored value of an indexed field, in string form.
    pub fn indexed_text(&self, field: IndexedField) -> Option<String> {
        match field {
            IndexedField::Year => self.year.map(|y| y.to_string()),
            IndexedField::Department => self.department.clone(),
            IndexedField::Indicator => self.indicator.clone(),
            IndexedField::Value => self.value.map(|v| v.to_string()),
        }
    }
}

/// A record ready to be written. The extracted fields can only be produced
/// from the payload, so they never drift from it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    row_index: i32,
    payload: Payload,
    fields: ExtractedFields,
}

impl NewRecord {
    pub fn new(row_index: i32, payload: Payload, synonyms: &FieldSynonyms) -> Self {
        let fields = extract_fields(&payload, synonyms);
        Self {
            row_index,
            payload,
            fields,
        }
    }

    pub fn row_index(&self) -> i32 {
        self.row_index
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn fields(&self) -> &ExtractedFields {
        &self.fields
    }
}

/// The typed, indexed columns of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexedField {
    Year,
    Department,
    Indicator,
    Value,
}

impl IndexedField {
    /// Resolves a field name (English or Spanish, lower-case, exact).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "year" | "anio" | "año" | "ano" => Some(Self::Year),
            "department" | "dependencia" => Some(Self::Department),
            "indicator" | "indicador" => Some(Self::Indicator),
            "value" | "valor" => Some(Self::Value),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Department => "department",
            Self::Indicator => "indicator",
            Self::Value => "value",
        }
    }

    /// Fields that aggregation groups by directly.
    pub fn is_categorical(self) -> bool {
        !matches!(self, Self::Value)
    }
}
