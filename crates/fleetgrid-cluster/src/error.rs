//! Cluster error types.

use thiserror::Error;

use fleet_core::ConfigError;
use fleetgrid_pool::PoolError;
use fleetgrid_provider::ProviderError;
use fleetgrid_state::StateError;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no admissible instance types")]
    NoInstanceTypes,

    /// No admissible shape can ever satisfy the requested minimum.
    #[error("resources exhausted: no instance type can satisfy {requirements}")]
    ResourcesExhausted { requirements: String },

    #[error("allocation cancelled")]
    Cancelled,

    #[error("cluster is shut down")]
    Shutdown,

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// A blocking store operation did not run to completion.
    #[error("background task failed: {0}")]
    Task(String),
}
