use hermes_metrics::{HasExitStatus, MetricsError};
use hermes_storage::StorageError;
use hermes_types::{ApiCall, ExitStatus, TargetSystem, TypesError};
use thiserror::Error;

pub type ProbeResult<T> = Result<T, ProbeError>;

/// A failed probe step.
///
/// `status` names the metric bucket the failure is filed under; the message
/// and optional storage error are for logs.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct ProbeError {
    pub status: ExitStatus,
    pub message: String,
    #[source]
    pub source: Option<StorageError>,
}

impl ProbeError {
    pub fn new(status: ExitStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
        }
    }

    /// Map a storage error: the not-exist sentinels become `FileMissing` and
    /// `BucketMissing`, backend timeouts become `OpTimeout`, anything else
    /// becomes `fallback`.
    pub fn storage(err: StorageError, fallback: ExitStatus, context: impl Into<String>) -> Self {
        let status = match &err {
            StorageError::ObjectNotExist { .. } => ExitStatus::FileMissing,
            StorageError::BucketNotExist(_) => ExitStatus::BucketMissing,
            StorageError::Timeout(_) => ExitStatus::OpTimeout,
            _ => fallback,
        };
        Self {
            status,
            message: context.into(),
            source: Some(err),
        }
    }

    /// Closing a writer commits the upload; any failure there is
    /// `WriterCloseFailed` whatever the cause, except a backend timeout.
    pub fn close_failed(err: StorageError, object: &str) -> Self {
        let status = match &err {
            StorageError::Timeout(_) => ExitStatus::OpTimeout,
            _ => ExitStatus::WriterCloseFailed,
        };
        Self {
            status,
            message: format!("closing writer for {object}"),
            source: Some(err),
        }
    }

    /// The per-call deadline expired.
    pub fn timeout(call: ApiCall) -> Self {
        Self::new(ExitStatus::OpTimeout, format!("{call} exceeded its deadline"))
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::new(ExitStatus::FileCorrupted, message)
    }
}

impl HasExitStatus for ProbeError {
    fn exit_status(&self) -> ExitStatus {
        self.status
    }
}

impl From<TypesError> for ProbeError {
    fn from(err: TypesError) -> Self {
        Self::new(ExitStatus::InvalidArgument, err.to_string())
    }
}

impl From<MetricsError> for ProbeError {
    fn from(err: MetricsError) -> Self {
        Self::new(ExitStatus::InvalidArgument, err.to_string())
    }
}

/// Errors that prevent the engine from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid probe configuration: {0}")]
    Invalid(#[from] TypesError),

    #[error("no storage backend configured for target {target} ({system})")]
    MissingBackend { target: String, system: TargetSystem },

    #[error("failed to build latency metrics: {0}")]
    Metrics(#[from] MetricsError),

    #[error("bucket {bucket} unavailable: {source}")]
    Bucket {
        bucket: String,
        #[source]
        source: StorageError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_mapping() {
        let missing = StorageError::object_not_exist("b", "o");
        assert_eq!(
            ProbeError::storage(missing, ExitStatus::ProbeFailed, "read").status,
            ExitStatus::FileMissing
        );
        assert_eq!(
            ProbeError::storage(
                StorageError::BucketNotExist("b".into()),
                ExitStatus::ProbeFailed,
                "write"
            )
            .status,
            ExitStatus::BucketMissing
        );
        assert_eq!(
            ProbeError::storage(StorageError::Io("disk".into()), ExitStatus::ProbeFailed, "write")
                .status,
            ExitStatus::ProbeFailed
        );
        assert_eq!(
            ProbeError::close_failed(StorageError::BucketNotExist("b".into()), "o").status,
            ExitStatus::WriterCloseFailed
        );
        assert_eq!(
            ProbeError::close_failed(StorageError::Timeout("slow".into()), "o").status,
            ExitStatus::OpTimeout
        );
        assert_eq!(ProbeError::timeout(ApiCall::ListFiles).exit_status(), ExitStatus::OpTimeout);
    }
}
