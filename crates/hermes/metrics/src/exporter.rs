//! Metric sink and Prometheus text exposition.
//!
//! The engine emits cumulative snapshots onto a channel. [`MetricSink`]
//! drains that channel, keeps the latest snapshot per series and renders them
//! through a [`Collector`] implementation.

use std::collections::BTreeMap;
use std::sync::RwLock;

use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{MetricsError, MetricsResult};
use crate::event::MetricEvent;
use crate::latency::{LatencyKey, API_LATENCY_METRIC, PROBE_LATENCY_METRIC};

/// Latest snapshot of every series seen on the metric channel.
pub struct MetricSink {
    series: RwLock<BTreeMap<String, MetricEvent>>,
    descs: Vec<Desc>,
}

impl MetricSink {
    pub fn new() -> Self {
        let descs = [
            (PROBE_LATENCY_METRIC, <hermes_types::ProbeOperation as LatencyKey>::HELP),
            (API_LATENCY_METRIC, <hermes_types::ApiCall as LatencyKey>::HELP),
        ]
        .into_iter()
        .filter_map(|(name, help)| {
            Desc::new(name.to_string(), help.to_string(), vec![], Default::default()).ok()
        })
        .collect();

        Self {
            series: RwLock::new(BTreeMap::new()),
            descs,
        }
    }

    /// Store `event`, replacing any older snapshot of the same series.
    pub fn record(&self, event: MetricEvent) {
        match self.series.write() {
            Ok(mut series) => {
                let key = event.series_key();
                match series.get(&key) {
                    Some(existing) if existing.timestamp > event.timestamp => {}
                    _ => {
                        series.insert(key, event);
                    }
                }
            }
            Err(_) => warn!("Metric sink lock poisoned, dropping event"),
        }
    }

    /// Drain `rx` until every sender is gone.
    pub async fn consume(&self, mut rx: mpsc::Receiver<MetricEvent>) {
        let mut received: u64 = 0;
        while let Some(event) = rx.recv().await {
            received += 1;
            self.record(event);
        }
        debug!(received, "Metric channel closed");
    }

    pub fn series_count(&self) -> usize {
        self.series.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Latest snapshot for each series.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.series
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    fn family(name: &str, help: &str, events: &[&MetricEvent]) -> MetricFamily {
        let mut family = MetricFamily::default();
        family.set_name(name.to_string());
        family.set_help(help.to_string());
        family.set_field_type(MetricType::HISTOGRAM);

        for event in events {
            let mut histogram = proto::Histogram::default();
            histogram.set_sample_count(event.distribution.count);
            histogram.set_sample_sum(event.distribution.sum);
            for bucket in &event.distribution.buckets {
                let mut b = proto::Bucket::default();
                b.set_upper_bound(bucket.upper_bound);
                b.set_cumulative_count(bucket.cumulative_count);
                histogram.mut_bucket().push(b);
            }

            let mut metric = proto::Metric::default();
            for (key, value) in &event.labels {
                let mut pair = proto::LabelPair::default();
                pair.set_name(key.clone());
                pair.set_value(value.clone());
                metric.mut_label().push(pair);
            }
            metric.set_histogram(histogram);
            family.mut_metric().push(metric);
        }
        family
    }
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MetricSink {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let events = self.events();
        let mut by_name: BTreeMap<&str, Vec<&MetricEvent>> = BTreeMap::new();
        for event in &events {
            by_name.entry(event.name.as_str()).or_default().push(event);
        }

        by_name
            .into_iter()
            .map(|(name, events)| {
                let help = self
                    .descs
                    .iter()
                    .find(|d| d.fq_name == name)
                    .map(|d| d.help.as_str())
                    .unwrap_or("Hermes latency distribution");
                Self::family(name, help, &events)
            })
            .collect()
    }
}

/// Render `collector` in Prometheus text format.
pub fn export_metrics(collector: &dyn Collector) -> MetricsResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&collector.collect(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
}

/// HTTP handler for metrics endpoint (requires "http" feature)
#[cfg(feature = "http")]
pub mod http {
    use std::sync::Arc;

    use axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Router,
    };

    use super::MetricSink;

    /// Handler for GET /metrics
    pub async fn metrics_handler(State(sink): State<Arc<MetricSink>>) -> Response {
        match super::export_metrics(sink.as_ref()) {
            Ok(body) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        }
    }

    pub fn metrics_router(sink: Arc<MetricSink>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::LatencyMetrics;
    use chrono::{Duration as ChronoDuration, Utc};
    use hermes_types::{ExitStatus, ProbeOperation, StorageSystemTag};
    use std::time::Duration;

    fn metrics() -> LatencyMetrics {
        LatencyMetrics::new(StorageSystemTag::Ceph, "t:b", &[0.5, 5.0], &[0.1]).unwrap()
    }

    #[tokio::test]
    async fn test_consume_keeps_latest_per_series() {
        let metrics = metrics();
        let sink = MetricSink::new();
        let (tx, rx) = mpsc::channel(1024);

        let first = metrics.snapshot(Utc::now());
        let series = first.len();
        for event in first {
            tx.send(event).await.unwrap();
        }
        metrics.probe_op.observe(
            ProbeOperation::TotalProbeRun,
            ExitStatus::Success,
            Duration::from_secs(1),
        );
        for event in metrics.snapshot(Utc::now() + ChronoDuration::seconds(1)) {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        sink.consume(rx).await;
        assert_eq!(sink.series_count(), series);
        let total = sink
            .events()
            .into_iter()
            .find(|e| {
                e.label("probe_operation_type") == Some("total_probe_run")
                    && e.label("exit_status") == Some("success")
            })
            .unwrap();
        assert_eq!(total.distribution.count, 1);
    }

    #[test]
    fn test_older_snapshot_does_not_replace_newer() {
        let metrics = metrics();
        let sink = MetricSink::new();
        let now = Utc::now();

        metrics.probe_op.observe(
            ProbeOperation::ReadFile,
            ExitStatus::Success,
            Duration::from_millis(10),
        );
        for event in metrics.snapshot(now) {
            sink.record(event);
        }
        let stale = LatencyMetrics::new(StorageSystemTag::Ceph, "t:b", &[0.5, 5.0], &[0.1])
            .unwrap()
            .snapshot(now - ChronoDuration::seconds(5));
        for event in stale {
            sink.record(event);
        }

        let read = sink
            .events()
            .into_iter()
            .find(|e| {
                e.label("probe_operation_type") == Some("read_file")
                    && e.label("exit_status") == Some("success")
            })
            .unwrap();
        assert_eq!(read.distribution.count, 1);
    }

    #[test]
    fn test_export_text_format() {
        let metrics = metrics();
        metrics.probe_op.observe(
            ProbeOperation::CreateFile,
            ExitStatus::Success,
            Duration::from_millis(300),
        );
        let sink = MetricSink::new();
        for event in metrics.snapshot(Utc::now()) {
            sink.record(event);
        }

        let output = export_metrics(&sink).unwrap();
        assert!(output.contains("# TYPE hermes_probe_latency_seconds histogram"));
        assert!(output.contains("# TYPE hermes_api_latency_seconds histogram"));
        assert!(output.contains(
            "hermes_probe_latency_seconds_count{exit_status=\"success\",probe_operation_type=\"create_file\",storage_system=\"CEPH\",target=\"t:b\"} 1"
        ));
    }
}
