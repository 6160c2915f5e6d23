//! Storage backend wiring.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hermes_storage::{FilesystemStore, GcsConfig, GcsStore, MemoryStore, ObjectStore};
use hermes_types::{HermesProbeConfig, TargetSystem};
use tracing::info;

use crate::config::{BackendConfig, BackendsConfig};
use crate::error::{DaemonError, DaemonResult};

/// Build one backend for every target system the probe uses.
pub fn build_backends(
    probe: &HermesProbeConfig,
    backends: &BackendsConfig,
) -> DaemonResult<HashMap<TargetSystem, Arc<dyn ObjectStore>>> {
    let mut out: HashMap<TargetSystem, Arc<dyn ObjectStore>> = HashMap::new();
    for target in &probe.targets {
        let system = target.target_system;
        if out.contains_key(&system) {
            continue;
        }
        let store = build_backend(system, backends.for_system(system))?;
        info!(system = %system, backend = store.backend_name(), "Storage backend ready");
        out.insert(system, store);
    }
    Ok(out)
}

fn build_backend(system: TargetSystem, config: &BackendConfig) -> DaemonResult<Arc<dyn ObjectStore>> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        BackendConfig::Filesystem { root } => {
            std::fs::create_dir_all(root)?;
            Ok(Arc::new(FilesystemStore::new(root.clone())))
        }
        BackendConfig::Gcs {
            endpoint,
            access_token_env,
            request_timeout_secs,
        } => {
            let access_token = match access_token_env {
                Some(var) => Some(
                    std::env::var(var).map_err(|_| DaemonError::MissingEnv(var.clone()))?,
                ),
                None => None,
            };
            let store = GcsStore::new(GcsConfig {
                endpoint: endpoint.clone(),
                access_token,
                request_timeout: Duration::from_secs(*request_timeout_secs),
            })
            .map_err(|source| DaemonError::Backend { system, source })?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;

    #[test]
    fn test_builds_only_used_systems() {
        let config = DaemonConfig::default();
        let backends = build_backends(&config.probe, &config.backends).unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(
            backends[&TargetSystem::GoogleCloudStorage].backend_name(),
            "memory"
        );
    }

    #[test]
    fn test_filesystem_backend_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("buckets");
        let mut config = DaemonConfig::default();
        config.backends.google_cloud_storage = BackendConfig::Filesystem { root: root.clone() };

        let backends = build_backends(&config.probe, &config.backends).unwrap();
        assert!(root.is_dir());
        assert_eq!(
            backends[&TargetSystem::GoogleCloudStorage].backend_name(),
            "filesystem"
        );
    }

    #[test]
    fn test_gcs_token_variable_must_exist() {
        let mut config = DaemonConfig::default();
        config.backends.google_cloud_storage = BackendConfig::Gcs {
            endpoint: "http://localhost:4443".to_string(),
            access_token_env: Some("HERMES_TEST_TOKEN_THAT_IS_NOT_SET".to_string()),
            request_timeout_secs: 5,
        };
        let err = build_backends(&config.probe, &config.backends).err().unwrap();
        assert!(matches!(err, DaemonError::MissingEnv(_)));
    }
}
