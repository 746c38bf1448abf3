//! Capacity view — live pool handles derived from the durable set.
//!
//! A rebuild keeps the handle of every instance that is still durable,
//! connects instances that have none yet, and drops handles whose durable
//! entry vanished. The new set is published to the [`Mux`] in one swap.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use fleetgrid_pool::{Mux, PoolConnector, PoolSet};
use fleetgrid_state::InstanceSet;

pub struct CapacityView {
    mux: Arc<Mux>,
    connector: Arc<dyn PoolConnector>,
    /// Rebuilds run one at a time.
    rebuild: Mutex<()>,
}

impl CapacityView {
    pub fn new(connector: Arc<dyn PoolConnector>) -> Self {
        Self {
            mux: Arc::new(Mux::new()),
            connector,
            rebuild: Mutex::new(()),
        }
    }

    /// The aggregated pool over every live handle.
    pub fn mux(&self) -> Arc<Mux> {
        self.mux.clone()
    }

    pub fn size(&self) -> usize {
        self.mux.size()
    }

    /// Bring the view in line with `instances`. Returns the handle count.
    pub fn rebuild(&self, instances: &InstanceSet) -> usize {
        let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());
        self.publish(instances)
    }

    /// Produce the set with `load` and rebuild from it, both under the
    /// rebuild guard. A set read here can never be published after a set
    /// that was saved later. Nothing is published when `load` fails.
    pub fn rebuild_from<E>(
        &self,
        load: impl FnOnce() -> Result<InstanceSet, E>,
    ) -> Result<usize, E> {
        let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());
        let instances = load()?;
        Ok(self.publish(&instances))
    }

    fn publish(&self, instances: &InstanceSet) -> usize {
        let current = self.mux.snapshot();

        let mut next = PoolSet::new();
        for (id, instance) in instances {
            if let Some(handle) = current.get(id) {
                next.insert(id.clone(), handle.clone());
                continue;
            }
            match self.connector.connect(instance) {
                Ok(handle) => {
                    debug!(instance = %id, address = %instance.address, "pool handle added");
                    next.insert(id.clone(), handle);
                }
                Err(e) => {
                    warn!(instance = %id, error = %e, "could not build pool handle, skipping instance");
                }
            }
        }

        let dropped = current.keys().filter(|id| !instances.contains_key(*id)).count();
        if dropped > 0 {
            debug!(dropped, "pool handles removed");
        }

        let size = next.len();
        self.mux.set_pools(next);
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{CPU, Labels, LiveInstance, Resources};
    use fleetgrid_pool::LocalConnector;

    fn instance(id: &str, address: &str) -> LiveInstance {
        LiveInstance {
            id: id.to_string(),
            instance_type: "c5.large".to_string(),
            address: address.to_string(),
            resources: Resources::new().with(CPU, 2.0),
            region: "us-west-2".to_string(),
            price: 0.085,
            spot: false,
            labels: Labels::new(),
            launched_at: 0,
        }
    }

    fn set(instances: &[LiveInstance]) -> InstanceSet {
        instances.iter().map(|i| (i.id.clone(), i.clone())).collect()
    }

    #[test]
    fn one_handle_per_durable_entry() {
        let view = CapacityView::new(Arc::new(LocalConnector));
        let a = instance("i-a", "a.internal");
        let b = instance("i-b", "b.internal");

        assert_eq!(view.rebuild(&set(&[a, b.clone()])), 2);
        let first = view.mux().snapshot();
        assert!(first.contains_key("i-a") && first.contains_key("i-b"));

        assert_eq!(view.rebuild(&set(&[b])), 1);
        let second = view.mux().snapshot();
        assert!(!second.contains_key("i-a"));
        assert!(Arc::ptr_eq(&first["i-b"], &second["i-b"]), "existing handle is kept");
    }

    #[test]
    fn unconnectable_instance_is_skipped() {
        let view = CapacityView::new(Arc::new(LocalConnector));
        let good = instance("i-a", "a.internal");
        let bad = instance("i-b", "");

        assert_eq!(view.rebuild(&set(&[good, bad])), 1);
        assert!(view.mux().get("i-b").is_none());

        let fixed = instance("i-b", "b.internal");
        assert_eq!(view.rebuild(&set(&[fixed])), 1);
        assert!(view.mux().get("i-b").is_some());
    }

    #[test]
    fn failed_load_keeps_current_view() {
        let view = CapacityView::new(Arc::new(LocalConnector));
        view.rebuild(&set(&[instance("i-a", "a.internal")]));

        let outcome = view.rebuild_from(|| Err::<InstanceSet, _>("store unavailable"));
        assert_eq!(outcome, Err("store unavailable"));
        assert!(view.mux().get("i-a").is_some());

        assert_eq!(view.rebuild_from(|| Ok::<_, ()>(InstanceSet::new())), Ok(0));
    }

    #[test]
    fn empty_set_clears_view() {
        let view = CapacityView::new(Arc::new(LocalConnector));
        view.rebuild(&set(&[instance("i-a", "a.internal")]));
        assert_eq!(view.rebuild(&InstanceSet::new()), 0);
        assert_eq!(view.size(), 0);
    }
}
