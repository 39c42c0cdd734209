//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A JSON or enum column could not be converted to or from its domain type.
    #[error("serialization error in column {column}: {message}")]
    Serialization { column: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    pub(crate) fn serialization(column: &str, message: impl std::fmt::Display) -> Self {
        Self::Serialization {
            column: column.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
