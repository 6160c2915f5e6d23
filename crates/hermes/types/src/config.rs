//! Typed probe configuration.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};
use crate::file::{MAX_FILE_ID, MIN_CHURN_FILE_ID};

/// Storage product behind a target bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetSystem {
    GoogleCloudStorage,
    Ceph,
}

impl fmt::Display for TargetSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSystem::GoogleCloudStorage => write!(f, "GOOGLE_CLOUD_STORAGE"),
            TargetSystem::Ceph => write!(f, "CEPH"),
        }
    }
}

/// Value of the `storage_system` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageSystemTag {
    Gcs,
    Ceph,
}

impl StorageSystemTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageSystemTag::Gcs => "GCS",
            StorageSystemTag::Ceph => "CEPH",
        }
    }
}

impl fmt::Display for StorageSystemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One probed bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Display name.
    pub name: String,

    pub bucket_name: String,

    pub target_system: TargetSystem,

    /// Space the operator allows Hermes to occupy in the bucket.
    pub total_space_allocated_mib: i64,
}

impl TargetConfig {
    /// Value of the `target` metric label: `<name>:<bucket>`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.name, self.bucket_name)
    }
}

/// Explicit histogram buckets, written as `"b1,b2,…"` in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub explicit_buckets: String,
}

impl DistributionConfig {
    pub fn new(explicit_buckets: impl Into<String>) -> Self {
        Self {
            explicit_buckets: explicit_buckets.into(),
        }
    }

    /// Parse the bucket list; bounds must be positive and strictly increasing.
    pub fn buckets(&self) -> TypesResult<Vec<f64>> {
        let invalid = |reason: String| TypesError::InvalidBuckets {
            spec: self.explicit_buckets.clone(),
            reason,
        };

        let mut bounds = Vec::new();
        for part in self.explicit_buckets.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty bucket bound".to_string()));
            }
            let bound: f64 = part
                .parse()
                .map_err(|e| invalid(format!("{part:?}: {e}")))?;
            if !bound.is_finite() || bound <= 0.0 {
                return Err(invalid(format!("bound {bound} must be positive and finite")));
            }
            if let Some(&last) = bounds.last() {
                if bound <= last {
                    return Err(invalid(format!("bound {bound} does not exceed {last}")));
                }
            }
            bounds.push(bound);
        }
        Ok(bounds)
    }
}

/// Configuration of one Hermes probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HermesProbeConfig {
    pub probe_name: String,

    pub targets: Vec<TargetConfig>,

    pub target_system_tag: StorageSystemTag,

    /// Tick period; also the deadline of each run.
    pub interval_sec: i32,

    /// Upper bound for a single storage API call.
    pub timeout_sec: i32,

    pub probe_latency_distribution: DistributionConfig,

    pub api_call_latency_distribution: DistributionConfig,

    /// Below this many churn files the probe creates one.
    #[serde(default = "default_min_churn_files")]
    pub min_churn_files: usize,

    /// Above this many churn files the probe deletes one.
    #[serde(default = "default_max_churn_files")]
    pub max_churn_files: usize,

    /// Create absent buckets during init.
    #[serde(default)]
    pub create_missing_buckets: bool,

    /// Project passed along when creating buckets.
    #[serde(default)]
    pub project: Option<String>,
}

fn default_min_churn_files() -> usize {
    10
}

fn default_max_churn_files() -> usize {
    30
}

impl HermesProbeConfig {
    /// Maximum number of churn ids available.
    pub const CHURN_CAPACITY: usize = (MAX_FILE_ID - MIN_CHURN_FILE_ID + 1) as usize;

    /// Check every constraint the engine relies on.
    pub fn validate(&self) -> TypesResult<()> {
        let invalid = |msg: String| Err(TypesError::InvalidConfig(msg));

        if self.probe_name.trim().is_empty() {
            return invalid("probe_name must not be empty".to_string());
        }
        if self.targets.is_empty() {
            return invalid("at least one target is required".to_string());
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return invalid("target name must not be empty".to_string());
            }
            if target.bucket_name.trim().is_empty() {
                return invalid(format!("target {} has an empty bucket_name", target.name));
            }
            if target.total_space_allocated_mib <= 0 {
                return invalid(format!(
                    "target {} must allocate a positive amount of space",
                    target.name
                ));
            }
            if !names.insert(target.name.as_str()) {
                return invalid(format!("duplicate target name {}", target.name));
            }
        }

        if self.interval_sec <= 0 {
            return invalid(format!("interval_sec must be > 0, got {}", self.interval_sec));
        }
        if self.timeout_sec <= 0 {
            return invalid(format!("timeout_sec must be > 0, got {}", self.timeout_sec));
        }

        self.probe_latency_distribution.buckets()?;
        self.api_call_latency_distribution.buckets()?;

        if self.min_churn_files > self.max_churn_files {
            return invalid(format!(
                "min_churn_files ({}) exceeds max_churn_files ({})",
                self.min_churn_files, self.max_churn_files
            ));
        }
        if self.max_churn_files > Self::CHURN_CAPACITY {
            return invalid(format!(
                "max_churn_files ({}) exceeds the {} available churn ids",
                self.max_churn_files,
                Self::CHURN_CAPACITY
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HermesProbeConfig {
        serde_json::from_value(serde_json::json!({
            "probe_name": "hermes",
            "targets": [{
                "name": "gcs-prod",
                "bucket_name": "hermes-prod",
                "target_system": "GOOGLE_CLOUD_STORAGE",
                "total_space_allocated_mib": 100
            }],
            "target_system_tag": "GCS",
            "interval_sec": 60,
            "timeout_sec": 10,
            "probe_latency_distribution": { "explicit_buckets": "0.01,0.1,1,10" },
            "api_call_latency_distribution": { "explicit_buckets": "0.001,0.01,0.1,1" }
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_and_validation() {
        let config = sample();
        assert_eq!(config.min_churn_files, 10);
        assert_eq!(config.max_churn_files, 30);
        assert!(!config.create_missing_buckets);
        assert!(config.validate().is_ok());
        assert_eq!(config.targets[0].label(), "gcs-prod:hermes-prod");
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let mut config = sample();
        config.interval_sec = 0;
        assert!(matches!(config.validate(), Err(TypesError::InvalidConfig(_))));

        let mut config = sample();
        config.timeout_sec = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_targets() {
        let mut config = sample();
        config.targets.push(config.targets[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_churn_band() {
        let mut config = sample();
        config.min_churn_files = 31;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.max_churn_files = 41;
        config.min_churn_files = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bucket_parsing() {
        let parsed = DistributionConfig::new("0.5, 1,2.5").buckets().unwrap();
        assert_eq!(parsed, vec![0.5, 1.0, 2.5]);

        assert!(DistributionConfig::new("").buckets().is_err());
        assert!(DistributionConfig::new("1,1").buckets().is_err());
        assert!(DistributionConfig::new("2,1").buckets().is_err());
        assert!(DistributionConfig::new("-1,1").buckets().is_err());
        assert!(DistributionConfig::new("a,b").buckets().is_err());
    }
}
