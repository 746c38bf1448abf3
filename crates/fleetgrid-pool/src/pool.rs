//! The pool contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleet_core::{Labels, LiveInstance, Requirements, Resources};

use crate::error::PoolResult;

/// Capacity reserved on one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alloc {
    pub id: String,
    /// Id of the pool (instance) holding the reservation.
    pub pool: String,
    pub address: String,
    pub resources: Resources,
    pub labels: Labels,
}

/// A handle to allocatable capacity.
#[async_trait]
pub trait Pool: Send + Sync {
    fn id(&self) -> &str;

    /// Capacity not currently reserved.
    async fn available(&self) -> PoolResult<Resources>;

    /// Reserve at least `req.min` and at most `req.max`.
    async fn allocate(&self, req: &Requirements, labels: &Labels) -> PoolResult<Alloc>;

    /// Release a reservation made by this pool.
    async fn free(&self, alloc_id: &str) -> PoolResult<()>;
}

/// Builds a pool handle for a live instance.
pub trait PoolConnector: Send + Sync {
    fn connect(&self, instance: &LiveInstance) -> PoolResult<Arc<dyn Pool>>;
}
