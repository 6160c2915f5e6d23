//! Error types for hermesd

use hermes_probe::ConfigError;
use hermes_storage::StorageError;
use hermes_types::TargetSystem;
use thiserror::Error;

/// Daemon errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend for {system} unavailable: {source}")]
    Backend {
        system: TargetSystem,
        #[source]
        source: StorageError,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("probe initialisation failed: {0}")]
    Probe(#[from] ConfigError),

    #[error("server error: {0}")]
    Server(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
