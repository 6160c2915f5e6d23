use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
///
/// `ObjectNotExist` and `BucketNotExist` are the sentinels the probe maps to
/// `FileMissing` and `BucketMissing`; everything else is a generic failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("object {bucket}/{object} does not exist")]
    ObjectNotExist { bucket: String, object: String },

    #[error("bucket {0} does not exist")]
    BucketNotExist(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn object_not_exist(bucket: &str, object: &str) -> Self {
        StorageError::ObjectNotExist {
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }

    pub fn is_object_not_exist(&self) -> bool {
        matches!(self, StorageError::ObjectNotExist { .. })
    }

    pub fn is_bucket_not_exist(&self) -> bool {
        matches!(self, StorageError::BucketNotExist(_))
    }
}
