//! fleetgrid-cluster — an elastic cluster sized to concurrent demand.
//!
//! Callers ask a [`Cluster`] for capacity. Requests that running instances
//! cannot serve become waiters for the grower, which packs them into
//! launches of the smallest sufficient instance shapes. Launched instances
//! are recorded in the durable set and turned into pool handles; a
//! reconciler evicts instances that die outside the cluster's control.
//!
//! # Tasks
//!
//! ```text
//! callers ──allocate──▶ Cluster ──waiters──▶ Grower ──launch──▶ Provider
//!                         │                    │
//!                         ▼                    ▼
//!                   CapacityView ◀──rebuild── Inventory ◀── Reconciler
//! ```

pub mod cluster;
pub mod error;
pub mod grower;
pub mod inventory;
mod reconciler;
pub mod view;
mod waiter;

pub use cluster::Cluster;
pub use error::{ClusterError, ClusterResult};
pub use grower::GrowerStatus;
pub use inventory::Inventory;
pub use view::CapacityView;
