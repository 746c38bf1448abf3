//! fleetgrid-provider — the compute provider as seen by the cluster.
//!
//! The cluster needs exactly two provider operations: launch one instance
//! of a shape, and describe the lifecycle state of a page of instances.
//! [`Provider`] captures both; [`sim::SimProvider`] implements them in
//! process for tests and standalone runs.

pub mod error;
pub mod provider;
pub mod sim;

pub use error::{LaunchError, ProviderError};
pub use provider::{InstanceStatus, LaunchParams, LaunchRequest, MAX_DESCRIBE_IDS, Provider};
pub use sim::SimProvider;
