//! The provider contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleet_core::{ClusterConfig, InstanceId, InstanceLifecycle, InstanceShape, Labels, LiveInstance};

use crate::error::{LaunchError, ProviderError};

/// Maximum number of instance ids accepted by one describe call.
pub const MAX_DESCRIBE_IDS: usize = 200;

/// Security, network, and bootstrap parameters shared by every launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub region: String,
    pub security_group: String,
    pub image: String,
    pub worker_image: String,
    pub disk_type: String,
    pub disk_space_gib: u64,
    pub spot: bool,
    pub instance_profile: String,
    pub key_name: String,
    pub ssh_key: String,
    pub tag: String,
    pub labels: Labels,
    pub immortal: bool,
}

impl LaunchParams {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            region: config.region.clone(),
            security_group: config.security_group.clone(),
            image: config.image.clone(),
            worker_image: config.worker_image.clone(),
            disk_type: config.disk_type.clone(),
            disk_space_gib: config.disk_space_gib,
            spot: config.spot,
            instance_profile: config.instance_profile.clone(),
            key_name: config.key_name.clone(),
            ssh_key: config.ssh_key.clone(),
            tag: config.tag.clone(),
            labels: config.labels.clone(),
            immortal: config.immortal,
        }
    }
}

/// One instance to launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub shape: InstanceShape,
    /// Hourly price in the launch region (the bid for spot launches).
    pub price: f64,
    pub params: LaunchParams,
}

/// Provider-reported state of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub state: InstanceLifecycle,
}

/// A compute provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Launch one instance and wait until it is running.
    async fn launch(&self, request: &LaunchRequest) -> Result<LiveInstance, LaunchError>;

    /// Lifecycle state for a page of ids. Ids the provider does not know are
    /// omitted from the result; ids that were not asked for may appear.
    async fn describe(&self, ids: &[InstanceId]) -> Result<Vec<InstanceStatus>, ProviderError>;

    /// Page size limit for [`Provider::describe`].
    fn max_describe_ids(&self) -> usize {
        MAX_DESCRIBE_IDS
    }
}
