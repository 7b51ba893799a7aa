//! Ingestion of uploaded spreadsheets into the record store.

pub mod config;
pub mod error;
pub mod materialize;
pub mod metadata;
pub mod pipeline;
pub mod storage;
pub mod table;
pub mod validate;

pub use config::Config;
pub use error::{IngestError, ParseError, ValidationError};
pub use pipeline::{inspect, BatchFailure, BatchOutcome, IngestOutcome, Ingestor, Upload};
pub use storage::BlobStorage;
pub use table::{parse, Table};
pub use validate::{validate, UploadLimits};
