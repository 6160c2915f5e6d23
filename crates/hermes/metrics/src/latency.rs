//! Per-target latency distributions keyed by (operation, exit status).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hermes_types::{ApiCall, ExitStatus, ProbeOperation, StorageSystemTag};
use prometheus::{Histogram, HistogramOpts};
use tokio::time::Instant;

use crate::error::MetricsResult;
use crate::event::{
    DistributionSnapshot, MetricEvent, LABEL_EXIT_STATUS, LABEL_STORAGE_SYSTEM, LABEL_TARGET,
};

pub const PROBE_LATENCY_METRIC: &str = "hermes_probe_latency_seconds";
pub const API_LATENCY_METRIC: &str = "hermes_api_latency_seconds";

/// A dimension of latency distributions: probe operations or API calls.
pub trait LatencyKey: Copy + Eq + Hash + fmt::Display + Send + Sync + 'static {
    /// Metric family the key belongs to.
    const METRIC_NAME: &'static str;
    /// Label carrying the key's value.
    const LABEL: &'static str;
    const HELP: &'static str;

    fn all() -> &'static [Self];
}

impl LatencyKey for ProbeOperation {
    const METRIC_NAME: &'static str = PROBE_LATENCY_METRIC;
    const LABEL: &'static str = "probe_operation_type";
    const HELP: &'static str = "Latency of Hermes probe operations";

    fn all() -> &'static [Self] {
        &ProbeOperation::ALL
    }
}

impl LatencyKey for ApiCall {
    const METRIC_NAME: &'static str = API_LATENCY_METRIC;
    const LABEL: &'static str = "api_call";
    const HELP: &'static str = "Latency of storage API calls issued by Hermes";

    fn all() -> &'static [Self] {
        &ApiCall::ALL
    }
}

/// Anything that knows which exit status it represents.
pub trait HasExitStatus {
    fn exit_status(&self) -> ExitStatus;
}

impl HasExitStatus for ExitStatus {
    fn exit_status(&self) -> ExitStatus {
        *self
    }
}

/// Histograms for every `(key, status)` pair, created up front.
pub struct LatencyMap<K: LatencyKey> {
    histograms: HashMap<(K, ExitStatus), Histogram>,
    labels: BTreeMap<String, String>,
}

impl<K: LatencyKey> LatencyMap<K> {
    pub fn new(storage_system: &str, target: &str, buckets: &[f64]) -> MetricsResult<Self> {
        let mut histograms = HashMap::with_capacity(K::all().len() * ExitStatus::ALL.len());
        for &key in K::all() {
            for status in ExitStatus::ALL {
                let opts = HistogramOpts::new(K::METRIC_NAME, K::HELP)
                    .const_label(LABEL_STORAGE_SYSTEM, storage_system)
                    .const_label(LABEL_TARGET, target)
                    .const_label(K::LABEL, key.to_string())
                    .const_label(LABEL_EXIT_STATUS, status.as_str())
                    .buckets(buckets.to_vec());
                histograms.insert((key, status), Histogram::with_opts(opts)?);
            }
        }

        let labels = BTreeMap::from([
            (LABEL_STORAGE_SYSTEM.to_string(), storage_system.to_string()),
            (LABEL_TARGET.to_string(), target.to_string()),
        ]);
        Ok(Self { histograms, labels })
    }

    pub fn observe(&self, key: K, status: ExitStatus, elapsed: Duration) {
        if let Some(histogram) = self.histograms.get(&(key, status)) {
            histogram.observe(elapsed.as_secs_f64());
        }
    }

    pub fn histogram(&self, key: K, status: ExitStatus) -> Option<&Histogram> {
        self.histograms.get(&(key, status))
    }

    /// Number of samples recorded for `(key, status)`.
    pub fn count(&self, key: K, status: ExitStatus) -> u64 {
        self.histogram(key, status)
            .map(Histogram::get_sample_count)
            .unwrap_or(0)
    }

    /// One event per `(key, status)` pair, in a stable order.
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> Vec<MetricEvent> {
        let mut events = Vec::with_capacity(self.histograms.len());
        for &key in K::all() {
            for status in ExitStatus::ALL {
                let Some(histogram) = self.histograms.get(&(key, status)) else {
                    continue;
                };
                let mut labels = self.labels.clone();
                labels.insert(K::LABEL.to_string(), key.to_string());
                labels.insert(LABEL_EXIT_STATUS.to_string(), status.as_str().to_string());
                events.push(MetricEvent {
                    timestamp,
                    name: K::METRIC_NAME.to_string(),
                    labels,
                    distribution: DistributionSnapshot::from_histogram(histogram),
                });
            }
        }
        events
    }
}

impl<K: LatencyKey> fmt::Debug for LatencyMap<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyMap")
            .field("metric", &K::METRIC_NAME)
            .field("labels", &self.labels)
            .field("series", &self.histograms.len())
            .finish()
    }
}

/// The two distribution families owned by a target.
#[derive(Debug)]
pub struct LatencyMetrics {
    pub probe_op: LatencyMap<ProbeOperation>,
    pub api_call: LatencyMap<ApiCall>,
}

impl LatencyMetrics {
    pub fn new(
        storage_system: StorageSystemTag,
        target: &str,
        probe_buckets: &[f64],
        api_buckets: &[f64],
    ) -> MetricsResult<Self> {
        Ok(Self {
            probe_op: LatencyMap::new(storage_system.as_str(), target, probe_buckets)?,
            api_call: LatencyMap::new(storage_system.as_str(), target, api_buckets)?,
        })
    }

    /// Snapshot every distribution with the given timestamp.
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> Vec<MetricEvent> {
        let mut events = self.probe_op.snapshot(timestamp);
        events.extend(self.api_call.snapshot(timestamp));
        events
    }
}

/// Time `fut` and file the sample under `map[key][status]`.
///
/// `Ok` counts as [`ExitStatus::Success`]; an error is filed under the status
/// it carries and returned unchanged.
pub async fn record_latency<K, T, E, F>(map: &LatencyMap<K>, key: K, fut: F) -> Result<T, E>
where
    K: LatencyKey,
    E: HasExitStatus,
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let result = fut.await;
    let status = match &result {
        Ok(_) => ExitStatus::Success,
        Err(e) => e.exit_status(),
    };
    map.observe(key, status, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> LatencyMap<ProbeOperation> {
        LatencyMap::new("GCS", "t1:bucket", &[0.1, 1.0, 10.0]).unwrap()
    }

    #[test]
    fn test_every_pair_is_materialised() {
        let metrics = LatencyMetrics::new(StorageSystemTag::Gcs, "t1:b", &[1.0], &[1.0]).unwrap();
        let events = metrics.snapshot(Utc::now());
        assert_eq!(
            events.len(),
            ExitStatus::ALL.len() * (ProbeOperation::ALL.len() + ApiCall::ALL.len())
        );
        assert!(events.iter().all(|e| e.distribution.count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_latency_routes_by_status() {
        let map = map();

        let ok: Result<u32, ExitStatus> = record_latency(&map, ProbeOperation::ReadFile, async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(7)
        })
        .await;
        assert_eq!(ok, Ok(7));

        let err: Result<(), ExitStatus> =
            record_latency(&map, ProbeOperation::ReadFile, async {
                Err(ExitStatus::FileCorrupted)
            })
            .await;
        assert_eq!(err, Err(ExitStatus::FileCorrupted));

        assert_eq!(map.count(ProbeOperation::ReadFile, ExitStatus::Success), 1);
        assert_eq!(map.count(ProbeOperation::ReadFile, ExitStatus::FileCorrupted), 1);
        assert_eq!(map.count(ProbeOperation::CreateFile, ExitStatus::Success), 0);

        let hist = map
            .histogram(ProbeOperation::ReadFile, ExitStatus::Success)
            .unwrap();
        let sum = hist.get_sample_sum();
        assert!((sum - 0.5).abs() < 0.01, "sum was {sum}");
    }

    #[test]
    fn test_snapshot_labels_and_buckets() {
        let map = map();
        map.observe(
            ProbeOperation::CreateFile,
            ExitStatus::WriterCloseFailed,
            Duration::from_millis(200),
        );
        let events = map.snapshot(Utc::now());
        let event = events
            .iter()
            .find(|e| {
                e.label("probe_operation_type") == Some("create_file")
                    && e.label("exit_status") == Some("writer_close_failed")
            })
            .unwrap();

        assert_eq!(event.name, PROBE_LATENCY_METRIC);
        assert_eq!(event.label("storage_system"), Some("GCS"));
        assert_eq!(event.label("target"), Some("t1:bucket"));
        assert_eq!(event.distribution.count, 1);
        let cumulative: Vec<_> = event
            .distribution
            .buckets
            .iter()
            .map(|b| b.cumulative_count)
            .collect();
        assert_eq!(cumulative, vec![0, 1, 1]);
    }

    #[test]
    fn test_invalid_buckets_rejected() {
        assert!(LatencyMap::<ApiCall>::new("GCS", "t", &[1.0, 0.5]).is_err());
    }
}
