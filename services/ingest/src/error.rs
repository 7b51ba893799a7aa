use records::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Upload rejected before anything is stored. The message is the reason
/// shown to the uploader.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("File is too large ({size_mb:.1} MB). Maximum allowed: {max_mb:.1} MB")]
    TooLarge { size_mb: f64, max_mb: f64 },

    #[error("File extension '{extension}' is not allowed. Allowed: {allowed}")]
    DisallowedExtension { extension: String, allowed: String },

    #[error("File content is not a spreadsheet (detected: {detected})")]
    MimeMismatch { detected: String },

    #[error("Could not read upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Neither spreadsheet reader could open the bytes.
#[derive(Error, Debug)]
#[error("Could not read spreadsheet '{filename}': xlsx: {modern}; xls: {legacy}")]
pub struct ParseError {
    pub filename: String,
    pub modern: String,
    pub legacy: String,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("Only the owner may delete file {0}")]
    NotOwner(Uuid),

    #[error("Spreadsheet has too many rows ({0})")]
    TooManyRows(usize),
}
