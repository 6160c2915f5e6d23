//! One probed bucket.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hermes_metrics::{record_latency, LatencyMetrics, MetricEvent};
use hermes_storage::BucketHandle;
use hermes_types::{
    parse_file_name, ApiCall, ExitStatus, FileId, HermesProbeConfig, ProbeOperation, RandomFile,
    StorageSystemTag, TargetConfig, FILE_NAME_PREFIX,
};
use rand::rngs::StdRng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ConfigError, ProbeError, ProbeResult};
use crate::journal::{bucket as journal_io, Journal};
use crate::ops;
use crate::policy::{PlannedOp, SelectionPolicy};

/// Borrowed view handed to every step of a run.
pub(crate) struct RunContext<'a> {
    pub metrics: &'a LatencyMetrics,
    pub deadline: Instant,
    pub call_timeout: Duration,
}

impl<'a> RunContext<'a> {
    fn new(metrics: &'a LatencyMetrics, deadline: Instant, call_timeout: Duration) -> Self {
        Self {
            metrics,
            deadline,
            call_timeout,
        }
    }

    /// Deadline of a single storage call: the per-call timeout, cut short by
    /// the run deadline.
    pub fn call_deadline(&self) -> Instant {
        self.deadline.min(Instant::now() + self.call_timeout)
    }

    /// Run one storage call under its deadline and time it.
    pub async fn api<T, F>(&self, call: ApiCall, fut: F) -> ProbeResult<T>
    where
        F: Future<Output = ProbeResult<T>>,
    {
        let deadline = self.call_deadline();
        record_latency(&self.metrics.api_call, call, async move {
            match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::timeout(call)),
            }
        })
        .await
    }
}

/// A bucket, its journal and its latency distributions.
#[derive(Debug)]
pub struct Target {
    config: TargetConfig,
    label: String,
    storage_system: StorageSystemTag,
    probe_buckets: Vec<f64>,
    api_buckets: Vec<f64>,
    call_timeout: Duration,
    metrics: Option<Arc<LatencyMetrics>>,
    rng: StdRng,
    pub(crate) bucket: BucketHandle,
    pub(crate) journal: Journal,
    /// Name of the journal object last read or written.
    pub(crate) journal_object: Option<String>,
    /// Superseded journal objects still awaiting deletion.
    pub(crate) stale_journals: Vec<String>,
    /// Whether `journal` reflects the bucket yet.
    pub(crate) journal_loaded: bool,
}

impl Target {
    pub fn new(
        config: TargetConfig,
        probe: &HermesProbeConfig,
        bucket: BucketHandle,
        call_timeout: Duration,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            label: config.label(),
            config,
            storage_system: probe.target_system_tag,
            probe_buckets: probe.probe_latency_distribution.buckets()?,
            api_buckets: probe.api_call_latency_distribution.buckets()?,
            call_timeout,
            metrics: None,
            rng,
            bucket,
            journal: Journal::new(),
            journal_object: None,
            stale_journals: Vec::new(),
            journal_loaded: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// `<name>:<bucket>`, the `target` metric label.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn bucket(&self) -> &BucketHandle {
        &self.bucket
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_object(&self) -> Option<&str> {
        self.journal_object.as_deref()
    }

    pub fn stale_journals(&self) -> &[String] {
        &self.stale_journals
    }

    /// Latency distributions, once the first operation has built them.
    pub fn metrics(&self) -> Option<&LatencyMetrics> {
        self.metrics.as_deref()
    }

    /// Snapshot of every distribution, empty before the first run.
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> Vec<MetricEvent> {
        self.metrics
            .as_ref()
            .map(|metrics| metrics.snapshot(timestamp))
            .unwrap_or_default()
    }

    fn latency_metrics(&mut self) -> ProbeResult<Arc<LatencyMetrics>> {
        if let Some(metrics) = &self.metrics {
            return Ok(metrics.clone());
        }
        let metrics = Arc::new(LatencyMetrics::new(
            self.storage_system,
            &self.label,
            &self.probe_buckets,
            &self.api_buckets,
        )?);
        debug!(target = %self.label, "Latency distributions created");
        self.metrics = Some(metrics.clone());
        Ok(metrics)
    }

    /// Load and verify the bucket's journal, finishing any pending intent.
    ///
    /// A bucket holding neither a journal nor data files is adopted as empty
    /// and reported as `AllFilesMissing`; the run may carry on from there.
    pub async fn check_journal(&mut self, deadline: Instant) -> ProbeResult<()> {
        let metrics = self.latency_metrics()?;
        let cx = RunContext::new(&metrics, deadline, self.call_timeout);
        record_latency(
            &metrics.probe_op,
            ProbeOperation::CheckJournal,
            self.check_or_bootstrap(&cx),
        )
        .await
    }

    async fn check_or_bootstrap(&mut self, cx: &RunContext<'_>) -> ProbeResult<()> {
        match journal_io::check(self, cx).await {
            Err(e) if e.status == ExitStatus::FileMissing && self.journal.is_empty() => {
                self.bootstrap(cx, e).await
            }
            other => other,
        }
    }

    pub async fn create_file(&mut self, file: &RandomFile, deadline: Instant) -> ProbeResult<()> {
        let metrics = self.latency_metrics()?;
        let cx = RunContext::new(&metrics, deadline, self.call_timeout);
        record_latency(
            &metrics.probe_op,
            ProbeOperation::CreateFile,
            ops::create_file(self, &cx, file),
        )
        .await
    }

    pub async fn read_file(&mut self, id: FileId, deadline: Instant) -> ProbeResult<()> {
        let metrics = self.latency_metrics()?;
        let cx = RunContext::new(&metrics, deadline, self.call_timeout);
        record_latency(
            &metrics.probe_op,
            ProbeOperation::ReadFile,
            ops::read_file(self, &cx, id),
        )
        .await
    }

    pub async fn delete_file(&mut self, id: FileId, deadline: Instant) -> ProbeResult<()> {
        let metrics = self.latency_metrics()?;
        let cx = RunContext::new(&metrics, deadline, self.call_timeout);
        record_latency(
            &metrics.probe_op,
            ProbeOperation::DeleteFile,
            ops::delete_file(self, &cx, id),
        )
        .await
    }

    /// Persist the journal with no pending intent.
    pub async fn update_journal(&mut self, deadline: Instant) -> ProbeResult<()> {
        let metrics = self.latency_metrics()?;
        let cx = RunContext::new(&metrics, deadline, self.call_timeout);
        journal_io::update(self, &cx).await
    }

    /// One full probe run: check, pick, operate, commit.
    pub async fn run(&mut self, deadline: Instant, policy: &dyn SelectionPolicy) -> ProbeResult<()> {
        let metrics = self.latency_metrics()?;
        record_latency(
            &metrics.probe_op,
            ProbeOperation::TotalProbeRun,
            self.run_steps(deadline, policy),
        )
        .await
    }

    async fn run_steps(&mut self, deadline: Instant, policy: &dyn SelectionPolicy) -> ProbeResult<()> {
        match self.check_journal(deadline).await {
            Ok(()) => {}
            Err(e) if e.status == ExitStatus::AllFilesMissing => {}
            Err(e) => return Err(e),
        }

        let op = policy.pick(&self.journal, &mut self.rng);
        debug!(target = %self.label, %op, "Selected operation");
        match op {
            PlannedOp::Create { id, size } => {
                let file = RandomFile::with_id(id, size)?;
                self.create_file(&file, deadline).await?;
            }
            PlannedOp::Read { id } => self.read_file(id, deadline).await?,
            PlannedOp::Delete { id } => self.delete_file(id, deadline).await?,
        }

        self.update_journal(deadline).await
    }

    /// A bucket with no journal may only be adopted when it also holds no
    /// Hermes data files.
    async fn bootstrap(&mut self, cx: &RunContext<'_>, missing: ProbeError) -> ProbeResult<()> {
        let listing = ops::list(&self.bucket, cx, FILE_NAME_PREFIX).await?;
        let orphans: Vec<&str> = listing
            .iter()
            .map(|o| o.name.as_str())
            .filter(|name| parse_file_name(name).is_some())
            .collect();
        if !orphans.is_empty() {
            warn!(target = %self.label, orphans = ?orphans, "Data files present without a journal");
            return Err(missing);
        }

        warn!(target = %self.label, "No journal and no data files, starting from an empty bucket");
        self.journal_loaded = true;
        Err(ProbeError::new(
            ExitStatus::AllFilesMissing,
            format!("bucket {} holds no Hermes objects", self.bucket.name()),
        ))
    }
}
