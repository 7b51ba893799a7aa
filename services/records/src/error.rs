use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid filter criteria: {message}")]
    InvalidCriteria { message: String },

    #[error("Field name must not be empty")]
    EmptyField,

    #[error("Owner scoping is enabled but no requesting user was given")]
    MissingRequester,

    #[error("No uploaded files available")]
    NoFilesAvailable,

    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueryError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        QueryError::InvalidCriteria {
            message: message.into(),
        }
    }
}
