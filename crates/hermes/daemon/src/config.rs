//! Configuration for hermesd

use std::net::SocketAddr;
use std::path::PathBuf;

use hermes_storage::gcs::DEFAULT_ENDPOINT;
use hermes_types::{
    DistributionConfig, HermesProbeConfig, StorageSystemTag, TargetConfig, TargetSystem,
};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Probe configuration handed to the engine
    pub probe: HermesProbeConfig,

    /// Storage backend per target system
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics endpoint configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            probe: default_probe(),
            backends: BackendsConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// A single in-memory target; enough to run the daemon locally.
fn default_probe() -> HermesProbeConfig {
    HermesProbeConfig {
        probe_name: "hermes-dev".to_string(),
        targets: vec![TargetConfig {
            name: "local".to_string(),
            bucket_name: "hermes-dev".to_string(),
            target_system: TargetSystem::GoogleCloudStorage,
            total_space_allocated_mib: 64,
        }],
        target_system_tag: StorageSystemTag::Gcs,
        interval_sec: 60,
        timeout_sec: 10,
        probe_latency_distribution: DistributionConfig::new(
            "0.01,0.025,0.05,0.1,0.25,0.5,1,2.5,5,10,30,60",
        ),
        api_call_latency_distribution: DistributionConfig::new(
            "0.005,0.01,0.025,0.05,0.1,0.25,0.5,1,2.5,5,10",
        ),
        min_churn_files: 10,
        max_churn_files: 30,
        create_missing_buckets: true,
        project: None,
    }
}

/// Backend wiring for each target system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub google_cloud_storage: BackendConfig,

    #[serde(default)]
    pub ceph: BackendConfig,
}

impl BackendsConfig {
    pub fn for_system(&self, system: TargetSystem) -> &BackendConfig {
        match system {
            TargetSystem::GoogleCloudStorage => &self.google_cloud_storage,
            TargetSystem::Ceph => &self.ceph,
        }
    }
}

/// A storage backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process store; contents are lost on exit
    #[default]
    Memory,

    /// Buckets as directories under `root`
    Filesystem { root: PathBuf },

    /// Google Cloud Storage JSON API
    Gcs {
        #[serde(default = "default_gcs_endpoint")]
        endpoint: String,

        /// Environment variable holding the OAuth2 bearer token
        #[serde(default)]
        access_token_env: Option<String>,

        #[serde(default = "default_request_timeout")]
        request_timeout_secs: u64,
    },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address serving `GET /metrics`
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: SocketAddr,

    /// Buffer between probe workers and the metric sink
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_metrics_addr(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// Default value helpers
fn default_gcs_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9464))
}

fn default_channel_capacity() -> usize {
    4096
}

impl DaemonConfig {
    /// Load configuration: defaults, then the file if given, then `HERMES_*`
    /// environment variables (`HERMES_PROBE__INTERVAL_SEC=30`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HERMES")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert!(config.probe.validate().is_ok());
        assert_eq!(config.metrics.listen_addr.port(), 9464);
        assert_eq!(config.backends.google_cloud_storage, BackendConfig::Memory);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_defaults_without_file() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.probe.probe_name, "hermes-dev");
        assert_eq!(config.probe.targets.len(), 1);
    }

    #[test]
    fn test_load_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[probe]
probe_name = "hermes-ceph"
target_system_tag = "CEPH"
interval_sec = 30

[[probe.targets]]
name = "rack-a"
bucket_name = "hermes-rack-a"
target_system = "CEPH"
total_space_allocated_mib = 128

[backends.ceph]
type = "filesystem"
root = "/mnt/cephfs/hermes"

[metrics]
listen_addr = "0.0.0.0:9000"
"#
        )
        .unwrap();

        let config = DaemonConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.probe.probe_name, "hermes-ceph");
        assert_eq!(config.probe.interval_sec, 30);
        assert_eq!(config.probe.timeout_sec, 10);
        assert_eq!(config.probe.targets[0].target_system, TargetSystem::Ceph);
        assert_eq!(
            config.backends.ceph,
            BackendConfig::Filesystem {
                root: PathBuf::from("/mnt/cephfs/hermes")
            }
        );
        assert_eq!(config.backends.google_cloud_storage, BackendConfig::Memory);
        assert_eq!(config.metrics.listen_addr.port(), 9000);
    }
}
