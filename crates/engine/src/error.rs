//! Engine error types.

use time::OffsetDateTime;
use univaf_metadata::MetadataError;
use uuid::Uuid;

/// Engine operation error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input. Never retried automatically.
    #[error("invalid value: {0}")]
    Value(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The report's `checked_at` did not advance past the stored record.
    /// Retrying the same payload will fail the same way.
    #[error(
        "out of date: {report_source} report for location {location_id} checked at {checked_at} is not newer than the stored record"
    )]
    OutOfDate {
        location_id: Uuid,
        report_source: String,
        checked_at: OffsetDateTime,
    },

    /// A duplicate cluster holds two values for a single-valued id system.
    #[error("merge conflict: system '{system}' has values {}", .values.join(", "))]
    MergeConflict { system: String, values: Vec<String> },

    /// Writing exported rows failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(univaf_core::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<univaf_core::Error> for EngineError {
    fn from(e: univaf_core::Error) -> Self {
        match e {
            univaf_core::Error::Value(message) => Self::Value(message),
            univaf_core::Error::MergeConflict { system, values } => {
                Self::MergeConflict { system, values }
            }
            other => Self::Core(other),
        }
    }
}

impl EngineError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Value(_) => "value_error",
            Self::NotFound(_) => "not_found",
            Self::OutOfDate { .. } => "out_of_date",
            Self::MergeConflict { .. } => "merge_conflict",
            Self::Io(_) => "io_error",
            Self::Core(_) => "core_error",
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => "not_found",
                MetadataError::AlreadyExists(_) | MetadataError::Constraint(_) => "conflict",
                _ => "metadata_error",
            },
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
