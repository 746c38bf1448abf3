//! Cluster — startup wiring and the allocation entry point.
//!
//! [`Cluster::start`] validates the configuration, resolves the admissible
//! shapes, loads the durable set into the capacity view, and spawns the
//! grower and reconciler tasks. [`Cluster::allocate`] is what callers use
//! to get capacity: a direct attempt against the running pools, then a
//! waiter registered with the grower, retried until it succeeds or the
//! caller gives up.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use fleet_core::{ClusterConfig, FleetConfig, InstanceId, InstanceShape, Labels, Requirements, Resources, Timings};
use fleetgrid_placement::{AdmissionPolicy, AvailabilityTracker, Catalog};
use fleetgrid_pool::{Alloc, Mux, Pool, PoolConnector};
use fleetgrid_provider::{LaunchParams, Provider};
use fleetgrid_state::{InstanceSet, StateStore};

use crate::error::{ClusterError, ClusterResult};
use crate::grower::{Grower, GrowerLimits, GrowerStatus};
use crate::inventory::Inventory;
use crate::reconciler::Reconciler;
use crate::view::CapacityView;
use crate::waiter::Waiter;

const INTAKE_CAPACITY: usize = 1024;

/// A running elastic cluster.
///
/// Dropping the cluster stops its background tasks.
pub struct Cluster {
    config: ClusterConfig,
    timings: Timings,
    tracker: Arc<AvailabilityTracker>,
    inventory: Inventory,
    reconciler: Reconciler,
    intake: mpsc::Sender<Waiter>,
    status: watch::Receiver<GrowerStatus>,
    shutdown: watch::Sender<bool>,
}

impl Cluster {
    /// Start a cluster. Must be called from within a tokio runtime.
    ///
    /// Fails without starting anything when the configuration is invalid
    /// or no catalog shape is admissible. A durable set that cannot be read
    /// yet is not fatal: the view starts empty and the periodic refresh
    /// fills it in.
    pub fn start(
        config: &FleetConfig,
        catalog: &Catalog,
        provider: Arc<dyn Provider>,
        connector: Arc<dyn PoolConnector>,
        store: StateStore,
    ) -> ClusterResult<Self> {
        config.cluster.validate()?;
        let timings = config.timing.parse()?;

        let policy = AdmissionPolicy::from_config(&config.cluster);
        let shapes = catalog.admissible(&policy);
        if shapes.is_empty() {
            return Err(ClusterError::NoInstanceTypes);
        }
        let tracker = Arc::new(AvailabilityTracker::new(shapes, timings.demotion_window));

        let view = Arc::new(CapacityView::new(connector));
        let inventory = Inventory::new(store, view);
        let existing = match inventory.refresh_blocking() {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to load instance set, starting with an empty view");
                0
            }
        };

        let (intake_tx, intake) = mpsc::channel(INTAKE_CAPACITY);
        let (status_tx, status) = watch::channel(GrowerStatus::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let grower = Grower::new(
            tracker.clone(),
            provider.clone(),
            inventory.clone(),
            LaunchParams::from_config(&config.cluster),
            GrowerLimits {
                max_instances: config.cluster.max_instances,
                max_pending: timings.max_pending,
                recheck_interval: timings.recheck_interval,
            },
            intake,
            status_tx,
        );
        tokio::spawn(grower.run(shutdown_rx.clone()));

        let maintenance = Reconciler::new(provider.clone(), inventory.clone());
        tokio::spawn(maintenance.run(timings, shutdown_rx));

        info!(
            region = %config.cluster.region,
            max_instances = config.cluster.max_instances,
            shapes = tracker.shapes().len(),
            instances = existing,
            "cluster started"
        );

        Ok(Self {
            config: config.cluster.clone(),
            timings,
            tracker,
            reconciler: Reconciler::new(provider, inventory.clone()),
            inventory,
            intake: intake_tx,
            status,
            shutdown,
        })
    }

    // ── Allocation ─────────────────────────────────────────────────

    /// Allocate at least `req.min` and up to `req.max`, growing the cluster
    /// if needed. Waits for as long as it takes.
    pub async fn allocate(&self, req: &Requirements, labels: &Labels) -> ClusterResult<Alloc> {
        self.allocate_until(req, labels, std::future::pending()).await
    }

    /// Like [`Cluster::allocate`], giving up with [`ClusterError::Cancelled`]
    /// as soon as `cancelled` completes.
    pub async fn allocate_until<C>(
        &self,
        req: &Requirements,
        labels: &Labels,
        cancelled: C,
    ) -> ClusterResult<Alloc>
    where
        C: Future<Output = ()>,
    {
        if !self.tracker.is_satisfiable(&req.min) {
            return Err(ClusterError::ResourcesExhausted {
                requirements: req.to_string(),
            });
        }
        if *self.shutdown.borrow() {
            return Err(ClusterError::Shutdown);
        }
        tokio::pin!(cancelled);

        if self.size() > 0 {
            if let Some(alloc) = self.attempt(req, labels, cancelled.as_mut()).await? {
                return Ok(alloc);
            }
        }

        let retry = self.timings.retry_interval;
        let mut tick = tokio::time::interval_at(Instant::now() + retry, retry);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut signal = self.register(req).await?;
        loop {
            tokio::select! {
                _ = &mut cancelled => {
                    debug!(requirements = %req, "allocation cancelled");
                    return Err(ClusterError::Cancelled);
                }
                woken = &mut signal => {
                    if woken.is_err() {
                        return Err(ClusterError::Shutdown);
                    }
                    if let Some(alloc) = self.attempt(req, labels, cancelled.as_mut()).await? {
                        return Ok(alloc);
                    }
                    signal = self.register(req).await?;
                }
                _ = tick.tick() => {
                    if let Some(alloc) = self.attempt(req, labels, cancelled.as_mut()).await? {
                        return Ok(alloc);
                    }
                }
            }
        }
    }

    /// One bounded direct allocation against the current pools, abandoned
    /// if the caller cancels first.
    async fn attempt<C>(
        &self,
        req: &Requirements,
        labels: &Labels,
        cancelled: Pin<&mut C>,
    ) -> ClusterResult<Option<Alloc>>
    where
        C: Future<Output = ()>,
    {
        let mux = self.pool();
        let direct = tokio::time::timeout(self.timings.allocate_timeout, mux.allocate(req, labels));
        tokio::select! {
            _ = cancelled => {
                debug!(requirements = %req, "allocation cancelled");
                Err(ClusterError::Cancelled)
            }
            outcome = direct => match outcome {
                Ok(Ok(alloc)) => {
                    debug!(alloc = %alloc.id, pool = %alloc.pool, resources = %alloc.resources, "allocated");
                    Ok(Some(alloc))
                }
                Ok(Err(e)) => {
                    debug!(requirements = %req, error = %e, "direct allocation failed");
                    Ok(None)
                }
                Err(_) => {
                    debug!(requirements = %req, "direct allocation timed out");
                    Ok(None)
                }
            },
        }
    }

    async fn register(&self, req: &Requirements) -> ClusterResult<oneshot::Receiver<()>> {
        let (waiter, signal) = Waiter::new(req.clone());
        self.intake
            .send(waiter)
            .await
            .map_err(|_| ClusterError::Shutdown)?;
        Ok(signal)
    }

    /// Release an allocation made through this cluster.
    pub async fn free(&self, alloc_id: &str) -> ClusterResult<()> {
        Ok(self.pool().free(alloc_id).await?)
    }

    // ── Introspection ──────────────────────────────────────────────

    /// The aggregated pool over every live instance.
    pub fn pool(&self) -> Arc<Mux> {
        self.inventory.view().mux()
    }

    /// Number of live pool handles.
    pub fn size(&self) -> usize {
        self.inventory.view().size()
    }

    /// Unreserved capacity summed across the cluster.
    pub async fn available(&self) -> ClusterResult<Resources> {
        Ok(self.pool().available().await?)
    }

    pub fn status(&self) -> GrowerStatus {
        self.status.borrow().clone()
    }

    /// The durable instance set.
    pub async fn instances(&self) -> ClusterResult<InstanceSet> {
        self.inventory.instances().await
    }

    /// Admissible shapes, smallest first.
    pub fn shapes(&self) -> &[InstanceShape] {
        self.tracker.shapes()
    }

    pub fn tracker(&self) -> &AvailabilityTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Run a reconciliation pass now instead of waiting for the next cycle.
    pub async fn reconcile(&self) -> ClusterResult<Vec<InstanceId>> {
        self.reconciler.reconcile_once().await
    }

    /// Re-read the durable set and rebuild the capacity view.
    pub async fn refresh(&self) -> ClusterResult<usize> {
        self.inventory.refresh().await
    }

    /// Stop the background tasks. Later allocations fail with
    /// [`ClusterError::Shutdown`].
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("cluster shutting down");
        }
    }
}
