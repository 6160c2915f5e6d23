//! Probe engine: owns the targets and drives them on a fixed interval.
//!
//! Each target runs on its own worker task. A ticker offers every worker one
//! deadline per interval; a worker that is still busy misses the tick and the
//! miss is logged. Workers publish a metrics snapshot after each run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use hermes_metrics::MetricEvent;
use hermes_storage::{ObjectStore, StorageClient};
use hermes_types::{HermesProbeConfig, TargetSystem};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::error::ConfigError;
use crate::policy::{BandPolicy, SelectionPolicy};
use crate::target::Target;

/// Everything [`ProbeEngine::init`] needs besides the probe name.
pub struct ProbeOptions {
    pub config: HermesProbeConfig,
    /// Backend serving each target system.
    pub backends: HashMap<TargetSystem, Arc<dyn ObjectStore>>,
    /// Overrides `config.interval_sec`.
    pub interval: Option<Duration>,
    /// Overrides `config.timeout_sec`.
    pub timeout: Option<Duration>,
    /// Parent span for every run; defaults to `hermes_probe`.
    pub span: Option<Span>,
    /// Seed for the per-target random sources.
    pub seed: Option<u64>,
    pub policy: Option<Arc<dyn SelectionPolicy>>,
}

impl ProbeOptions {
    pub fn new(config: HermesProbeConfig) -> Self {
        Self {
            config,
            backends: HashMap::new(),
            interval: None,
            timeout: None,
            span: None,
            seed: None,
            policy: None,
        }
    }

    pub fn with_backend(mut self, system: TargetSystem, store: Arc<dyn ObjectStore>) -> Self {
        self.backends.insert(system, store);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// A configured probe over one or more targets.
pub struct ProbeEngine {
    name: String,
    config: HermesProbeConfig,
    interval: Duration,
    span: Span,
    policy: Arc<dyn SelectionPolicy>,
    targets: Vec<Target>,
}

impl ProbeEngine {
    /// Validate the configuration and bind every target to its backend.
    pub async fn init(name: impl Into<String>, options: ProbeOptions) -> Result<Self, ConfigError> {
        let name = name.into();
        let ProbeOptions {
            config,
            backends,
            interval,
            timeout,
            span,
            seed,
            policy,
        } = options;
        config.validate()?;

        let interval = interval.unwrap_or_else(|| Duration::from_secs(config.interval_sec as u64));
        let call_timeout = timeout.unwrap_or_else(|| Duration::from_secs(config.timeout_sec as u64));
        if call_timeout > interval {
            warn!(probe = %name, ?call_timeout, ?interval, "Call timeout exceeds the probe interval");
        }
        let span = span.unwrap_or_else(|| info_span!("hermes_probe", probe = %name));
        let policy = policy.unwrap_or_else(|| Arc::new(BandPolicy::from_config(&config)));

        let mut targets = Vec::with_capacity(config.targets.len());
        for (index, target_config) in config.targets.iter().enumerate() {
            let store = backends
                .get(&target_config.target_system)
                .cloned()
                .ok_or_else(|| ConfigError::MissingBackend {
                    target: target_config.name.clone(),
                    system: target_config.target_system,
                })?;
            let client = StorageClient::new(store);
            let bucket = client.bucket(target_config.bucket_name.clone());

            if config.create_missing_buckets {
                let exists = bucket.exists().await.map_err(|source| ConfigError::Bucket {
                    bucket: bucket.name().to_string(),
                    source,
                })?;
                if !exists {
                    info!(bucket = %bucket.name(), backend = client.backend_name(), "Creating missing bucket");
                    bucket
                        .create(config.project.as_deref())
                        .await
                        .map_err(|source| ConfigError::Bucket {
                            bucket: bucket.name().to_string(),
                            source,
                        })?;
                }
            }

            let rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
                None => StdRng::from_entropy(),
            };
            targets.push(Target::new(
                target_config.clone(),
                &config,
                bucket,
                call_timeout,
                rng,
            )?);
        }

        info!(probe = %name, targets = targets.len(), ?interval, ?call_timeout, "Probe initialised");
        Ok(Self {
            name,
            config,
            interval,
            span,
            policy,
            targets,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HermesProbeConfig {
        &self.config
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name() == name)
    }

    pub fn target_mut(&mut self, name: &str) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.name() == name)
    }

    /// Run every target once, concurrently, with one interval as deadline.
    pub async fn run_once(&mut self, metric_tx: &mpsc::Sender<MetricEvent>) {
        let deadline = Instant::now() + self.interval;
        let policy = self.policy.clone();
        let parent = self.span.clone();
        let runs = self.targets.iter_mut().map(|target| {
            let span = info_span!(parent: &parent, "target", target = %target.label());
            probe_and_emit(target, deadline, policy.as_ref(), metric_tx).instrument(span)
        });
        join_all(runs).await;
    }

    /// Tick until `shutdown` changes, then wait for the workers to stop.
    ///
    /// In-flight runs are abandoned on shutdown; their intents, if any, are
    /// finished by the next check after a restart.
    pub async fn start(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        metric_tx: mpsc::Sender<MetricEvent>,
    ) {
        if *shutdown.borrow() {
            return;
        }

        let targets = std::mem::take(&mut self.targets);
        let mut ticks = Vec::with_capacity(targets.len());
        let mut workers = Vec::with_capacity(targets.len());
        for target in targets {
            let (tick_tx, tick_rx) = mpsc::channel::<Instant>(1);
            let span = info_span!(parent: &self.span, "target", target = %target.label());
            ticks.push((target.label().to_string(), tick_tx));
            workers.push(tokio::spawn(
                worker(
                    target,
                    tick_rx,
                    shutdown.clone(),
                    self.policy.clone(),
                    metric_tx.clone(),
                )
                .instrument(span),
            ));
        }
        info!(parent: &self.span, interval = ?self.interval, workers = workers.len(), "Probe started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let deadline = Instant::now() + self.interval;
                    for (label, tick_tx) in &ticks {
                        match tick_tx.try_send(deadline) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(parent: &self.span, target = %label, "Previous run still in progress, skipping tick");
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!(parent: &self.span, target = %label, "Worker has stopped");
                            }
                        }
                    }
                }
            }
        }

        drop(ticks);
        for joined in join_all(workers).await {
            match joined {
                Ok(target) => self.targets.push(target),
                Err(e) => error!(parent: &self.span, error = %e, "Probe worker failed"),
            }
        }
        info!(parent: &self.span, "Probe stopped");
    }
}

async fn worker(
    mut target: Target,
    mut ticks: mpsc::Receiver<Instant>,
    mut shutdown: watch::Receiver<bool>,
    policy: Arc<dyn SelectionPolicy>,
    metric_tx: mpsc::Sender<MetricEvent>,
) -> Target {
    loop {
        let deadline = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            tick = ticks.recv() => match tick {
                Some(deadline) => deadline,
                None => break,
            },
        };
        if deadline <= Instant::now() {
            warn!("Tick expired before the run could start");
            continue;
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                info!("Shutdown requested, abandoning in-flight run");
                break;
            }
            _ = probe_and_emit(&mut target, deadline, policy.as_ref(), &metric_tx) => {}
        }
    }
    target
}

async fn probe_and_emit(
    target: &mut Target,
    deadline: Instant,
    policy: &dyn SelectionPolicy,
    metric_tx: &mpsc::Sender<MetricEvent>,
) {
    match target.run(deadline, policy).await {
        Ok(()) => info!(files = target.journal().filenames.len(), "Probe run succeeded"),
        Err(e) => warn!(status = %e.status, error = %e, "Probe run failed"),
    }

    for event in target.snapshot(Utc::now()) {
        if metric_tx.send(event).await.is_err() {
            debug!("Metric channel closed");
            break;
        }
    }
}
