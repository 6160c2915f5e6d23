//! hermesd - black-box object-storage probe
//!
//! Runs a Hermes probe against the configured buckets and serves the
//! resulting latency distributions at `/metrics`.

use anyhow::Context;
use clap::Parser;
use hermes_daemon::{DaemonConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hermes daemon CLI
#[derive(Parser)]
#[command(name = "hermesd")]
#[command(about = "Hermes - black-box probe for object storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HERMES_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "HERMES_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "HERMES_LOG_JSON")]
    json: bool,

    /// Metrics listen address
    #[arg(long, env = "HERMES_METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(addr) = cli.metrics_addr {
        config.metrics.listen_addr = addr
            .parse()
            .with_context(|| format!("invalid metrics address {addr}"))?;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        probe = %config.probe.probe_name,
        targets = config.probe.targets.len(),
        metrics = %config.metrics.listen_addr,
        "Starting hermesd"
    );

    Server::new(config).run().await?;
    Ok(())
}
