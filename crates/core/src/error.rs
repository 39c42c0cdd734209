//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad timestamp, negative count, unparseable cursor.
    #[error("invalid value: {0}")]
    Value(String),

    /// Two locations in one duplicate cluster carry different values for a
    /// single-valued identifier system.
    #[error("conflicting values for external id system '{system}': {}", .values.join(", "))]
    MergeConflict { system: String, values: Vec<String> },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a [`Error::Value`].
    pub fn value(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_conflict_lists_values() {
        let err = Error::MergeConflict {
            system: "kroger".to_string(),
            values: vec!["123".to_string(), "456".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "conflicting values for external id system 'kroger': 123, 456"
        );
    }
}
