//! Record store shared by the ingestion pipeline and the read API.
//!
//! Spreadsheet rows are kept as schema-less [`Payload`]s with four indexed
//! fields (year, department, indicator, value) derived from them at write
//! time. The [`FilterEngine`] selects records of one file and the
//! [`AggregationEngine`] turns a selection into a label/value series.

pub mod aggregate;
pub mod error;
pub mod extract;
pub mod filter;
pub mod model;
pub mod payload;
pub mod store;
pub mod summary;
pub mod synonyms;

pub use aggregate::{aggregate_records, Aggregation, AggregationEngine};
pub use error::{QueryError, StoreError};
pub use extract::{extract_fields, ExtractedFields};
pub use filter::{FileFilter, FilterCriteria, FilterEngine, FilterOptions, RecordQuery, RecordSet, TextSearch};
pub use model::{FileMetadata, IndexedField, NewRecord, NewUploadedFile, Record, UploadedFile};
pub use payload::{Payload, Scalar};
pub use store::{MemoryStore, PgStore, RecordStore};
pub use summary::{file_summary, search_records, statistics, FileSummary, SearchPage, Statistics};
pub use synonyms::FieldSynonyms;
