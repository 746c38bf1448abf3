//! fleet.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Labels;

const GIB: u64 = 1 << 30;

/// Errors detected while validating a cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing max instances parameter")]
    MissingMaxInstances,

    #[error("missing disk type parameter")]
    MissingDiskType,

    #[error("missing disk space parameter")]
    MissingDiskSpace,

    #[error("disk space of {0} GiB is out of range")]
    DiskSpaceOutOfRange(u64),

    #[error("missing image parameter")]
    MissingImage,

    #[error("missing region parameter")]
    MissingRegion,

    #[error("missing security group")]
    MissingSecurityGroup,

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Parameters of the elastic cluster and of every instance it launches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Fleet ceiling: live plus pending instances never exceed this.
    pub max_instances: usize,
    pub region: String,
    pub security_group: String,
    /// VM image used to launch new instances.
    pub image: String,
    /// Container image run by the worker on each instance.
    pub worker_image: String,
    pub disk_type: String,
    /// Disk space per node in GiB; also injected as each shape's disk capacity.
    pub disk_space_gib: u64,
    pub spot: bool,
    /// Admissible instance types. `None` admits the whole catalog.
    pub instance_types: Option<Vec<String>>,
    /// Tag attached to every instance created by this cluster.
    pub tag: String,
    pub labels: Labels,
    pub instance_profile: String,
    pub key_name: String,
    pub ssh_key: String,
    /// Disable idle shutdown on launched workers.
    pub immortal: bool,
}

impl ClusterConfig {
    /// Check the parameters without which the cluster must not start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 {
            return Err(ConfigError::MissingMaxInstances);
        }
        if self.disk_type.is_empty() {
            return Err(ConfigError::MissingDiskType);
        }
        if self.disk_space_gib == 0 {
            return Err(ConfigError::MissingDiskSpace);
        }
        if self.disk_space_gib.checked_mul(GIB).is_none() {
            return Err(ConfigError::DiskSpaceOutOfRange(self.disk_space_gib));
        }
        if self.image.is_empty() {
            return Err(ConfigError::MissingImage);
        }
        if self.region.is_empty() {
            return Err(ConfigError::MissingRegion);
        }
        if self.security_group.is_empty() {
            return Err(ConfigError::MissingSecurityGroup);
        }
        Ok(())
    }

    /// Disk space per node in bytes.
    pub fn disk_bytes(&self) -> f64 {
        self.disk_space_gib as f64 * GIB as f64
    }
}

/// Loop cadences and per-attempt bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub reconcile_interval: String,
    pub refresh_interval: String,
    pub demotion_window: String,
    pub recheck_interval: String,
    pub allocate_timeout: String,
    pub retry_interval: String,
    /// Maximum number of concurrent in-flight launches.
    pub max_pending: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: "60s".to_string(),
            refresh_interval: "10s".to_string(),
            demotion_window: "5m".to_string(),
            recheck_interval: "60s".to_string(),
            allocate_timeout: "30s".to_string(),
            retry_interval: "20s".to_string(),
            max_pending: 5,
        }
    }
}

/// `TimingConfig` with every duration parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub reconcile_interval: Duration,
    pub refresh_interval: Duration,
    pub demotion_window: Duration,
    pub recheck_interval: Duration,
    pub allocate_timeout: Duration,
    pub retry_interval: Duration,
    pub max_pending: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(10),
            demotion_window: Duration::from_secs(5 * 60),
            recheck_interval: Duration::from_secs(60),
            allocate_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(20),
            max_pending: 5,
        }
    }
}

impl TimingConfig {
    pub fn parse(&self) -> Result<Timings, ConfigError> {
        let field = |field: &'static str, value: &str| {
            parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
                field,
                value: value.to_string(),
            })
        };
        Ok(Timings {
            reconcile_interval: field("reconcile_interval", &self.reconcile_interval)?,
            refresh_interval: field("refresh_interval", &self.refresh_interval)?,
            demotion_window: field("demotion_window", &self.demotion_window)?,
            recheck_interval: field("recheck_interval", &self.recheck_interval)?,
            allocate_timeout: field("allocate_timeout", &self.allocate_timeout)?,
            retry_interval: field("retry_interval", &self.retry_interval)?,
            max_pending: self.max_pending.max(1),
        })
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h". A bare number
/// is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins = mins.trim().parse::<u64>().ok()?;
        mins.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours = hours.trim().parse::<u64>().ok()?;
        hours.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClusterConfig {
        ClusterConfig {
            max_instances: 10,
            region: "us-west-2".to_string(),
            security_group: "sg-123".to_string(),
            image: "ami-123".to_string(),
            disk_type: "gp3".to_string(),
            disk_space_gib: 250,
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[cluster]
max_instances = 4
region = "us-west-2"
security_group = "sg-1"
image = "ami-1"
disk_type = "gp3"
disk_space_gib = 100
instance_types = ["c5.large", "m5.large"]

[cluster.labels]
team = "infra"
"#;
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cluster.max_instances, 4);
        assert_eq!(config.cluster.labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(config.cluster.instance_types.as_ref().map(Vec::len), Some(2));
        assert!(config.cluster.validate().is_ok());
        assert_eq!(config.timing.parse().unwrap(), Timings::default());
    }

    #[test]
    fn validate_reports_each_missing_parameter() {
        assert!(valid().validate().is_ok());

        let cases: [(fn(&mut ClusterConfig), ConfigError); 6] = [
            (|c| c.max_instances = 0, ConfigError::MissingMaxInstances),
            (|c| c.disk_type.clear(), ConfigError::MissingDiskType),
            (|c| c.disk_space_gib = 0, ConfigError::MissingDiskSpace),
            (|c| c.image.clear(), ConfigError::MissingImage),
            (|c| c.region.clear(), ConfigError::MissingRegion),
            (|c| c.security_group.clear(), ConfigError::MissingSecurityGroup),
        ];
        for (mutate, expected) in cases {
            let mut config = valid();
            mutate(&mut config);
            assert_eq!(config.validate(), Err(expected));
        }
    }

    #[test]
    fn disk_bytes_from_gib() {
        assert_eq!(valid().disk_bytes(), 250.0 * (1u64 << 30) as f64);
    }

    #[test]
    fn oversized_disk_is_rejected() {
        let mut config = valid();
        config.disk_space_gib = u64::MAX >> 30;
        assert!(config.validate().is_ok());

        config.disk_space_gib = (u64::MAX >> 30) + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::DiskSpaceOutOfRange((u64::MAX >> 30) + 1))
        );
        assert_eq!(config.disk_bytes(), 2f64.powi(64));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert_eq!(parse_duration(&format!("{}h", u64::MAX / 60)), None);
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)),
            Some(Duration::from_secs(u64::MAX / 60 * 60))
        );

        let timing = TimingConfig {
            demotion_window: format!("{}h", u64::MAX),
            ..TimingConfig::default()
        };
        assert!(matches!(
            timing.parse(),
            Err(ConfigError::InvalidDuration { field: "demotion_window", .. })
        ));
    }

    #[test]
    fn invalid_timing_is_reported() {
        let timing = TimingConfig {
            retry_interval: "often".to_string(),
            ..TimingConfig::default()
        };
        assert!(matches!(
            timing.parse(),
            Err(ConfigError::InvalidDuration { field: "retry_interval", .. })
        ));
    }

    #[test]
    fn config_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        let config = FleetConfig {
            cluster: valid(),
            timing: TimingConfig::default(),
        };
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        let loaded = FleetConfig::from_file(&path).unwrap();
        assert_eq!(loaded.cluster.region, "us-west-2");
        assert_eq!(loaded.cluster.disk_space_gib, 250);
    }
}
