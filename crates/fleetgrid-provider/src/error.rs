//! Provider error types.

use thiserror::Error;

/// Why a launch did not produce a running instance.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    /// The provider cannot supply this shape in this region right now.
    #[error("instance type {instance_type} unavailable in region {region}: {reason}")]
    Unavailable {
        instance_type: String,
        region: String,
        reason: String,
    },

    #[error("launch failed: {0}")]
    Failed(String),
}

impl LaunchError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LaunchError::Unavailable { .. })
    }
}

/// Errors from provider queries.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("describe failed: {0}")]
    Describe(String),

    #[error("too many ids in one describe call: {got} > {limit}")]
    TooManyIds { got: usize, limit: usize },
}
