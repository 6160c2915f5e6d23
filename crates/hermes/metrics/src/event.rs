//! Metric events emitted to the host channel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use prometheus::core::Metric;
use prometheus::Histogram;
use serde::{Deserialize, Serialize};

pub const LABEL_STORAGE_SYSTEM: &str = "storage_system";
pub const LABEL_TARGET: &str = "target";
pub const LABEL_EXIT_STATUS: &str = "exit_status";

/// One histogram bucket: samples with value `<= upper_bound`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCount {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

/// Point-in-time copy of a latency distribution.
///
/// Counts are cumulative since the distribution was created, so the latest
/// snapshot for a label set supersedes every earlier one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    pub buckets: Vec<BucketCount>,
    pub count: u64,
    pub sum: f64,
}

impl DistributionSnapshot {
    pub fn from_histogram(histogram: &Histogram) -> Self {
        let metric = histogram.metric();
        let proto = metric.get_histogram();
        Self {
            buckets: proto
                .get_bucket()
                .iter()
                .map(|b| BucketCount {
                    upper_bound: b.get_upper_bound(),
                    cumulative_count: b.get_cumulative_count(),
                })
                .collect(),
            count: proto.get_sample_count(),
            sum: proto.get_sample_sum(),
        }
    }
}

/// A labelled distribution snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub distribution: DistributionSnapshot,
}

impl MetricEvent {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Name plus labels; identifies the series this event belongs to.
    pub fn series_key(&self) -> String {
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{}}}", self.name, labels)
    }
}
