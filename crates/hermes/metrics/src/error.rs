use hermes_types::TypesError;
use thiserror::Error;

pub type MetricsResult<T> = Result<T, MetricsError>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid distribution: {0}")]
    InvalidDistribution(#[from] TypesError),

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metric encoding failed: {0}")]
    Encoding(String),
}
