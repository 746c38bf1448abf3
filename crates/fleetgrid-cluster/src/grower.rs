//! Grower — the demand-driven launch loop.
//!
//! A single task owns every waiter and every in-flight launch. Callers
//! reach it only through the intake queue; launches report back through a
//! completion queue. Each turn of the loop:
//!
//! 1. drops waiters whose callers stopped waiting,
//! 2. packs the waiters not already covered by an in-flight launch,
//! 3. starts planned launches while both the in-flight limit and the fleet
//!    ceiling allow,
//! 4. waits for a completion, a new waiter, shutdown, or (when demand is
//!    blocked) a delayed re-check.
//!
//! On a successful launch the instance is recorded, the capacity view is
//! rebuilt, and waiters whose minimum fits the new capacity are woken.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleet_core::{InstanceShape, LiveInstance, Resources};
use fleetgrid_placement::{AvailabilityTracker, pack};
use fleetgrid_provider::{LaunchError, LaunchParams, LaunchRequest, Provider};

use crate::inventory::Inventory;
use crate::waiter::Waiter;

/// Point-in-time view of the grower's working state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GrowerStatus {
    /// Callers currently waiting for capacity.
    pub waiters: usize,
    pub pending_launches: usize,
    /// Sum of the capacity of in-flight launches.
    pub pending_resources: Resources,
    pub launched: u64,
    pub failed: u64,
    /// Waiters woken by a completed launch.
    pub satisfied: u64,
}

/// Limits and cadences the grower runs with.
#[derive(Debug, Clone)]
pub(crate) struct GrowerLimits {
    pub max_instances: usize,
    pub max_pending: usize,
    pub recheck_interval: Duration,
}

struct Entry {
    id: u64,
    waiter: Waiter,
    /// Covered by an in-flight launch.
    assigned: bool,
}

struct PendingLaunch {
    shape: InstanceShape,
    /// Ids of the waiters this launch was planned for.
    members: Vec<u64>,
    task: JoinHandle<()>,
}

type Completion = (u64, Result<LiveInstance, LaunchError>);

pub(crate) struct Grower {
    tracker: Arc<AvailabilityTracker>,
    provider: Arc<dyn Provider>,
    inventory: Inventory,
    params: LaunchParams,
    limits: GrowerLimits,
    intake: mpsc::Receiver<Waiter>,
    status: watch::Sender<GrowerStatus>,

    waiters: Vec<Entry>,
    in_flight: HashMap<u64, PendingLaunch>,
    pending: Resources,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    next_waiter: u64,
    next_launch: u64,
    launched: u64,
    failed: u64,
    satisfied: u64,
}

impl Grower {
    pub fn new(
        tracker: Arc<AvailabilityTracker>,
        provider: Arc<dyn Provider>,
        inventory: Inventory,
        params: LaunchParams,
        limits: GrowerLimits,
        intake: mpsc::Receiver<Waiter>,
        status: watch::Sender<GrowerStatus>,
    ) -> Self {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        Self {
            tracker,
            provider,
            inventory,
            params,
            limits,
            intake,
            status,
            waiters: Vec::new(),
            in_flight: HashMap::new(),
            pending: Resources::new(),
            completions_tx,
            completions,
            next_waiter: 1,
            next_launch: 1,
            launched: 0,
            failed: 0,
            satisfied: 0,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_instances = self.limits.max_instances,
            max_pending = self.limits.max_pending,
            "grower started"
        );
        loop {
            let blocked = self.plan().await;
            self.publish();

            let delay = self.limits.recheck_interval;
            let recheck = async move {
                if blocked {
                    tokio::time::sleep(delay).await;
                } else {
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                Some(completion) = self.completions.recv() => self.on_completion(completion).await,
                received = self.intake.recv() => match received {
                    Some(waiter) => {
                        self.on_waiter(waiter);
                        while let Ok(more) = self.intake.try_recv() {
                            self.on_waiter(more);
                        }
                    }
                    None => {
                        debug!("intake closed");
                        break;
                    }
                },
                _ = recheck => debug!(waiters = self.waiters.len(), "re-checking blocked demand"),
                _ = shutdown.changed() => {
                    info!("grower shutting down");
                    break;
                }
            }
        }

        for (_, launch) in self.in_flight.drain() {
            launch.task.abort();
        }
    }

    // ── Planning ───────────────────────────────────────────────────

    /// Pack and launch. Returns true when demand remains that nothing
    /// in flight will resolve, so the loop must re-check on a timer.
    async fn plan(&mut self) -> bool {
        self.prune_cancelled();

        let open: Vec<usize> = (0..self.waiters.len())
            .filter(|&i| !self.waiters[i].assigned)
            .collect();
        if open.is_empty() {
            return false;
        }

        let demands: Vec<Resources> = open
            .iter()
            .map(|&i| self.waiters[i].waiter.req.min.clone())
            .collect();
        let spot = self.params.spot;
        let tracker = &self.tracker;
        let packing = pack(&demands, |need| tracker.select_minimal(need, spot));

        for &k in &packing.skipped {
            debug!(
                requirements = %self.waiters[open[k]].waiter.req,
                "no available instance type can satisfy waiter"
            );
        }
        if packing.launches.is_empty() {
            return true;
        }

        let live = self.inventory.count().await;
        for planned in packing.launches {
            if self.in_flight.len() >= self.limits.max_pending {
                debug!(in_flight = self.in_flight.len(), "in-flight launch limit reached");
                return false;
            }
            if live + self.in_flight.len() >= self.limits.max_instances {
                debug!(
                    live,
                    in_flight = self.in_flight.len(),
                    max_instances = self.limits.max_instances,
                    "fleet ceiling reached"
                );
                return true;
            }
            let members: Vec<u64> = planned
                .members
                .iter()
                .map(|&k| {
                    let entry = &mut self.waiters[open[k]];
                    entry.assigned = true;
                    entry.id
                })
                .collect();
            self.start_launch(planned.shape, members);
        }
        false
    }

    fn start_launch(&mut self, shape: InstanceShape, members: Vec<u64>) {
        // Admissible shapes always carry a price for the configured region.
        let price = shape.price(&self.params.region).unwrap_or_default();
        let launch_id = self.next_launch;
        self.next_launch += 1;

        info!(
            instance_type = %shape.instance_type,
            price,
            waiters = members.len(),
            "launching instance"
        );

        let request = LaunchRequest {
            shape: shape.clone(),
            price,
            params: self.params.clone(),
        };
        let provider = self.provider.clone();
        let done = self.completions_tx.clone();
        let task = tokio::spawn(async move {
            let outcome = provider.launch(&request).await;
            let _ = done.send((launch_id, outcome));
        });

        self.pending += &shape.resources;
        self.in_flight.insert(
            launch_id,
            PendingLaunch {
                shape,
                members,
                task,
            },
        );
    }

    // ── Events ─────────────────────────────────────────────────────

    fn on_waiter(&mut self, waiter: Waiter) {
        self.prune_cancelled();
        if waiter.is_cancelled() {
            return;
        }
        debug!(requirements = %waiter.req, "waiter registered");
        self.waiters.push(Entry {
            id: self.next_waiter,
            waiter,
            assigned: false,
        });
        self.next_waiter += 1;
    }

    async fn on_completion(&mut self, (launch_id, outcome): Completion) {
        let Some(launch) = self.in_flight.remove(&launch_id) else {
            return;
        };
        self.pending = self.pending.saturating_sub(&launch.shape.resources);
        for entry in &mut self.waiters {
            if launch.members.contains(&entry.id) {
                entry.assigned = false;
            }
        }

        match outcome {
            Ok(instance) => {
                self.launched += 1;
                info!(
                    instance = %instance.id,
                    instance_type = %instance.instance_type,
                    address = %instance.address,
                    "instance launched"
                );
                let capacity = instance.resources.clone();
                if let Err(e) = self.inventory.add(instance).await {
                    error!(error = %e, "failed to record launched instance");
                }
                self.satisfy(capacity, &launch.members);
            }
            Err(e) if e.is_unavailable() => {
                self.failed += 1;
                warn!(instance_type = %launch.shape.instance_type, error = %e, "instance type unavailable");
                self.tracker.demote(&launch.shape);
            }
            Err(e) => {
                self.failed += 1;
                warn!(instance_type = %launch.shape.instance_type, error = %e, "launch failed");
            }
        }
    }

    /// Wake every waiter whose minimum fits in what is left of `capacity`,
    /// the launch's own members first, then the rest in arrival order.
    /// Each woken waiter consumes up to its maximum.
    fn satisfy(&mut self, capacity: Resources, members: &[u64]) {
        let mut order: Vec<usize> = (0..self.waiters.len()).collect();
        order.sort_by_key(|&i| !members.contains(&self.waiters[i].id));

        let mut left = capacity;
        let mut chosen = HashSet::new();
        for i in order {
            let entry = &self.waiters[i];
            if entry.assigned || entry.waiter.is_cancelled() {
                continue;
            }
            if !entry.waiter.req.min.le_all(&left) {
                continue;
            }
            let take = entry.waiter.req.max.component_min(&left);
            left = left.saturating_sub(&take);
            chosen.insert(entry.id);
        }

        let (woken, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|e| chosen.contains(&e.id));
        self.waiters = kept;
        for entry in woken {
            if entry.waiter.signal() {
                self.satisfied += 1;
            }
        }
    }

    fn prune_cancelled(&mut self) {
        let before = self.waiters.len();
        self.waiters.retain(|e| !e.waiter.is_cancelled());
        let pruned = before - self.waiters.len();
        if pruned > 0 {
            debug!(pruned, "dropped cancelled waiters");
        }
    }

    fn publish(&self) {
        self.status.send_replace(GrowerStatus {
            waiters: self.waiters.len(),
            pending_launches: self.in_flight.len(),
            pending_resources: self.pending.clone(),
            launched: self.launched,
            failed: self.failed,
            satisfied: self.satisfied,
        });
    }
}
