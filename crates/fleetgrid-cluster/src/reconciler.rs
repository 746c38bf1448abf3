//! Reconciler — keeps the durable set honest.
//!
//! Instances can stop or terminate outside the cluster's control. Once at
//! startup and then on a fixed interval the reconciler asks the provider
//! about every durable instance, page by page, and evicts the ones that are
//! gone. The same task refreshes the capacity view on its own, faster
//! cadence so that instances recorded by other processes become usable.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fleet_core::{InstanceId, Timings};
use fleetgrid_provider::Provider;

use crate::error::{ClusterError, ClusterResult};
use crate::inventory::Inventory;

pub(crate) struct Reconciler {
    provider: Arc<dyn Provider>,
    inventory: Inventory,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn Provider>, inventory: Inventory) -> Self {
        Self {
            provider,
            inventory,
        }
    }

    /// One reconciliation pass. Returns the ids that were evicted.
    ///
    /// A describe failure abandons the pass without touching the durable
    /// set.
    pub async fn reconcile_once(&self) -> ClusterResult<Vec<InstanceId>> {
        let instances = self.inventory.instances().await?;
        if instances.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<InstanceId> = instances.keys().cloned().collect();
        let page = self.provider.max_describe_ids().max(1);
        let mut dead = Vec::new();
        for chunk in ids.chunks(page) {
            let statuses = self.provider.describe(chunk).await?;
            let reported: HashMap<&str, _> = statuses
                .iter()
                .map(|s| (s.id.as_str(), s.state))
                .collect();
            for id in chunk {
                match reported.get(id.as_str()) {
                    None => {
                        debug!(instance = %id, "instance missing from provider");
                        dead.push(id.clone());
                    }
                    Some(state) if state.is_dead() => {
                        debug!(instance = %id, %state, "instance no longer live");
                        dead.push(id.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        if dead.is_empty() {
            debug!(checked = ids.len(), "all instances live");
            return Ok(dead);
        }
        self.inventory.remove(dead.clone()).await?;
        info!(evicted = dead.len(), checked = ids.len(), "reconciled instance set");
        Ok(dead)
    }

    /// Reconcile at startup and every `reconcile_interval`; refresh the
    /// view every `refresh_interval`. Runs until shutdown.
    pub async fn run(self, timings: Timings, mut shutdown: watch::Receiver<bool>) {
        let mut reconcile = tokio::time::interval(timings.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = tokio::time::interval_at(
            Instant::now() + timings.refresh_interval,
            timings.refresh_interval,
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = reconcile.tick() => match self.reconcile_once().await {
                    Ok(_) => {}
                    Err(ClusterError::State(e)) => {
                        error!(error = %e, "reconciliation skipped: state store unavailable");
                    }
                    Err(e) => warn!(error = %e, "reconciliation failed, retrying next cycle"),
                },
                _ = refresh.tick() => {
                    if let Err(e) = self.inventory.refresh().await {
                        error!(error = %e, "capacity view refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}
