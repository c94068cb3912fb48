use thiserror::Error;

/// Validation and contract errors exposed by `tidemark-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("natural key cannot be empty")]
    EmptyNaturalKey,
    #[error("natural key length {len} exceeds max {max}")]
    NaturalKeyTooLong { len: usize, max: usize },
    #[error("natural key contains invalid character '{ch}' at index {index}")]
    NaturalKeyInvalidChar { ch: char, index: usize },

    #[error("invalid source '{value}', expected one of tiingo, alphavantage, yahoo")]
    InvalidSource { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("request_id must be at least 8 characters")]
    InvalidRequestId,
    #[error("schema_version must match vMAJOR.MINOR.PATCH: '{value}'")]
    InvalidSchemaVersion { value: String },

    #[error("error code cannot be empty")]
    EmptyErrorCode,
    #[error("error message cannot be empty")]
    EmptyErrorMessage,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
