//! Error types for hermes-types.

use thiserror::Error;

/// Errors raised while building identities or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// File id outside `[1, 50]`.
    #[error("invalid file id {0}: expected 1..=50")]
    InvalidFileId(i64),

    /// File size outside `(0, 1000]`.
    #[error("invalid file size {0}: expected 1..=1000 bytes")]
    InvalidFileSize(usize),

    /// Explicit distribution buckets could not be parsed.
    #[error("invalid distribution buckets {spec:?}: {reason}")]
    InvalidBuckets { spec: String, reason: String },

    /// Probe configuration failed validation.
    #[error("invalid probe configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for hermes-types operations.
pub type TypesResult<T> = Result<T, TypesError>;
