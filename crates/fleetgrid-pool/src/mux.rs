//! Mux — the aggregated pool.
//!
//! Holds the current set of pool handles as an atomically swappable
//! snapshot. Readers always see a complete set; writers replace the whole
//! set in one pointer swap.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::debug;

use fleet_core::{Labels, Requirements, Resources};

use crate::error::{PoolError, PoolResult};
use crate::pool::{Alloc, Pool};

/// Pool handles keyed by pool (instance) id.
pub type PoolSet = BTreeMap<String, Arc<dyn Pool>>;

pub struct Mux {
    pools: ArcSwap<PoolSet>,
}

impl Mux {
    pub fn new() -> Self {
        Self {
            pools: ArcSwap::from_pointee(PoolSet::new()),
        }
    }

    /// Replace the pool set atomically.
    pub fn set_pools(&self, pools: PoolSet) {
        self.pools.store(Arc::new(pools));
    }

    /// The current pool set.
    pub fn snapshot(&self) -> Arc<PoolSet> {
        self.pools.load_full()
    }

    pub fn size(&self) -> usize {
        self.pools.load().len()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Pool>> {
        self.pools.load().get(id).cloned()
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pool for Mux {
    fn id(&self) -> &str {
        "mux"
    }

    /// Sum of available capacity across every pool that answers.
    async fn available(&self) -> PoolResult<Resources> {
        let pools = self.snapshot();
        let mut total = Resources::new();
        for pool in pools.values() {
            match pool.available().await {
                Ok(r) => total += &r,
                Err(e) => debug!(pool = pool.id(), error = %e, "pool did not report capacity"),
            }
        }
        Ok(total)
    }

    /// Try pools whose available capacity covers `req.min`, tightest fit
    /// first, and return the first successful reservation.
    async fn allocate(&self, req: &Requirements, labels: &Labels) -> PoolResult<Alloc> {
        let pools = self.snapshot();
        let mut candidates = Vec::new();
        for pool in pools.values() {
            match pool.available().await {
                Ok(available) if req.min.le_all(&available) => {
                    candidates.push((available.scaled_distance(None), pool.clone()));
                }
                Ok(_) => {}
                Err(e) => debug!(pool = pool.id(), error = %e, "pool did not report capacity"),
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id().cmp(b.1.id())));

        for (_, pool) in candidates {
            match pool.allocate(req, labels).await {
                Ok(alloc) => return Ok(alloc),
                Err(e) => debug!(pool = pool.id(), error = %e, "allocation attempt failed"),
            }
        }
        Err(PoolError::Unavailable(req.to_string()))
    }

    async fn free(&self, alloc_id: &str) -> PoolResult<()> {
        let pools = self.snapshot();
        for pool in pools.values() {
            if pool.free(alloc_id).await.is_ok() {
                return Ok(());
            }
        }
        Err(PoolError::UnknownAlloc(alloc_id.to_string()))
    }
}
