//! fleetgrid-pool — capacity on running workers.
//!
//! A [`Pool`] is a handle to the allocatable capacity of one worker. The
//! cluster builds one handle per live instance through a
//! [`PoolConnector`] and publishes them together as a [`Mux`], which is
//! itself a `Pool`: callers see one logical cluster.

pub mod error;
pub mod local;
pub mod mux;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use local::{LocalConnector, LocalPool};
pub use mux::{Mux, PoolSet};
pub use pool::{Alloc, Pool, PoolConnector};
