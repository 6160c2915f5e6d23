//! Server setup and lifecycle management

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use hermes_metrics::{metrics_router, MetricSink};
use hermes_probe::{ProbeEngine, ProbeOptions};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};

use crate::backends::build_backends;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};

/// Liveness response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub probe: String,
    pub targets: Vec<String>,
    pub version: &'static str,
}

/// `/metrics` plus a `/health` liveness route.
pub fn router(sink: Arc<MetricSink>, probe: String, targets: Vec<String>) -> Router {
    let health = HealthResponse {
        status: "healthy",
        probe,
        targets,
        version: env!("CARGO_PKG_VERSION"),
    };
    metrics_router(sink)
        .route(
            "/health",
            get(move || {
                let health = health.clone();
                async move { Json(health) }
            }),
        )
        .layer(TraceLayer::new_for_http())
}

/// hermesd: one probe engine and its metrics endpoint
pub struct Server {
    config: DaemonConfig,
}

impl Server {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        let probe = self.config.probe.clone();
        let backends = build_backends(&probe, &self.config.backends)?;
        let targets = probe.targets.iter().map(|t| t.label()).collect();

        let mut options = ProbeOptions::new(probe.clone()).with_span(info_span!(
            "hermesd",
            probe = %probe.probe_name,
            version = env!("CARGO_PKG_VERSION")
        ));
        options.backends = backends;
        let mut engine = ProbeEngine::init(probe.probe_name.clone(), options).await?;

        let sink = Arc::new(MetricSink::new());
        let (metric_tx, metric_rx) = mpsc::channel(self.config.metrics.channel_capacity.max(1));
        let consumer = tokio::spawn({
            let sink = sink.clone();
            async move { sink.consume(metric_rx).await }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let addr = self.config.metrics.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Metrics endpoint listening");

        let app = router(sink, probe.probe_name.clone(), targets);
        let mut http_shutdown = shutdown_tx.subscribe();
        let http = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.changed().await;
                })
                .await
        });

        let probe_task = tokio::spawn(async move {
            engine.start(shutdown_rx, metric_tx).await;
            engine
        });

        shutdown_signal().await;
        info!("hermesd shutting down");
        let _ = shutdown_tx.send(true);

        match probe_task.await {
            Ok(engine) => info!(probe = %engine.name(), targets = engine.targets().len(), "Probe engine stopped"),
            Err(e) => error!(error = %e, "Probe engine task failed"),
        }
        if let Err(e) = consumer.await {
            error!(error = %e, "Metric consumer task failed");
        }
        match http.await {
            Ok(result) => result.map_err(|e| DaemonError::Server(e.to_string()))?,
            Err(e) => return Err(DaemonError::Server(e.to_string())),
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
