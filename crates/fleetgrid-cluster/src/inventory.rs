//! Inventory — durable-set mutations paired with view rebuilds.
//!
//! Every change to the durable set goes through the store's exclusive lock
//! and is followed by a capacity view rebuild from the set that was saved.
//! Loads and saves run inside the view's rebuild guard, so the view only
//! ever moves forward.
//!
//! Store calls can wait on another process's file lock. The async methods
//! run them on the blocking pool; the `_blocking` variants are for startup
//! and for callers already off the runtime.

use std::sync::Arc;

use tracing::{error, info};

use fleet_core::{InstanceId, LiveInstance};
use fleetgrid_state::{InstanceSet, StateError, StateResult, StateStore};

use crate::error::{ClusterError, ClusterResult};
use crate::view::CapacityView;

#[derive(Clone)]
pub struct Inventory {
    store: StateStore,
    view: Arc<CapacityView>,
}

impl Inventory {
    pub fn new(store: StateStore, view: Arc<CapacityView>) -> Self {
        Self { store, view }
    }

    pub fn view(&self) -> &Arc<CapacityView> {
        &self.view
    }

    /// The durable set. A store that was never written is empty.
    pub async fn instances(&self) -> ClusterResult<InstanceSet> {
        self.off_runtime(|inv| inv.instances_blocking()).await
    }

    /// Number of durable instances, falling back to the view size when the
    /// store cannot be read.
    pub async fn count(&self) -> usize {
        match self.instances().await {
            Ok(set) => set.len(),
            Err(e) => {
                error!(error = %e, "failed to read instance set");
                self.view.size()
            }
        }
    }

    /// Record a launched instance.
    pub async fn add(&self, instance: LiveInstance) -> ClusterResult<()> {
        self.off_runtime(move |inv| inv.add_blocking(instance)).await
    }

    /// Drop `ids` from the durable set in one locked update. Returns how
    /// many were present.
    pub async fn remove(&self, ids: Vec<InstanceId>) -> ClusterResult<usize> {
        self.off_runtime(move |inv| inv.remove_blocking(&ids)).await
    }

    /// Rebuild the view from the durable set as it is now.
    pub async fn refresh(&self) -> ClusterResult<usize> {
        self.off_runtime(|inv| inv.refresh_blocking()).await
    }

    async fn off_runtime<T, F>(&self, op: F) -> ClusterResult<T>
    where
        F: FnOnce(&Inventory) -> StateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inventory = self.clone();
        tokio::task::spawn_blocking(move || op(&inventory))
            .await
            .map_err(|e| ClusterError::Task(e.to_string()))?
            .map_err(ClusterError::from)
    }

    // ── Blocking ───────────────────────────────────────────────────

    pub fn instances_blocking(&self) -> StateResult<InstanceSet> {
        match self.store.load() {
            Err(StateError::NoState) => Ok(InstanceSet::new()),
            other => other,
        }
    }

    pub fn add_blocking(&self, instance: LiveInstance) -> StateResult<()> {
        let id = instance.id.clone();
        let pools = self.view.rebuild_from(|| {
            self.store.update(|set| {
                set.insert(instance.id.clone(), instance);
            })
        })?;
        info!(instance = %id, pools, "instance recorded");
        Ok(())
    }

    pub fn remove_blocking(&self, ids: &[InstanceId]) -> StateResult<usize> {
        let mut removed = 0;
        let pools = self.view.rebuild_from(|| {
            self.store.update(|set| {
                for id in ids {
                    if set.remove(id).is_some() {
                        removed += 1;
                    }
                }
            })
        })?;
        if removed > 0 {
            info!(removed, pools, "instances removed");
        }
        Ok(removed)
    }

    pub fn refresh_blocking(&self) -> StateResult<usize> {
        self.view.rebuild_from(|| self.instances_blocking())
    }
}
