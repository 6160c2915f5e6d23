//! Hermes metrics
//!
//! Latency is the only signal Hermes produces. Every probe operation and
//! every storage API call is timed and filed into a histogram selected by
//! its exit status:
//!
//! - `hermes_probe_latency_seconds{storage_system, target, probe_operation_type, exit_status}`
//! - `hermes_api_latency_seconds{storage_system, target, api_call, exit_status}`
//!
//! All `(key, status)` histograms are created when a target's
//! [`LatencyMetrics`] is built, so recording on the hot path is a lookup and
//! an observe. [`record_latency`] is the way samples get recorded.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

mod error;
pub mod event;
pub mod exporter;
pub mod latency;

pub use error::{MetricsError, MetricsResult};
pub use event::{BucketCount, DistributionSnapshot, MetricEvent};
pub use exporter::{export_metrics, MetricSink};
pub use latency::{
    record_latency, HasExitStatus, LatencyKey, LatencyMap, LatencyMetrics, API_LATENCY_METRIC,
    PROBE_LATENCY_METRIC,
};

#[cfg(feature = "http")]
pub use exporter::http::{metrics_handler, metrics_router};
