//! End-to-end cluster scenarios against the simulated provider.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout};

use fleet_core::{
    CPU, ClusterConfig, FleetConfig, InstanceLifecycle, InstanceShape, Labels, Requirements,
    Resources, TimingConfig,
};
use fleetgrid_cluster::{Cluster, ClusterError};
use fleetgrid_placement::Catalog;
use fleetgrid_pool::LocalConnector;
use fleetgrid_provider::SimProvider;
use fleetgrid_state::StateStore;

// ── Helpers ────────────────────────────────────────────────────────

fn shape(ty: &str, cpu: f64) -> InstanceShape {
    InstanceShape {
        instance_type: ty.to_string(),
        resources: Resources::new().with(CPU, cpu),
        prices: BTreeMap::from([("us-west-2".to_string(), cpu * 0.05)]),
        spot_eligible: true,
    }
}

fn cpu(n: f64) -> Requirements {
    Requirements::exact(Resources::new().with(CPU, n))
}

fn config(max_instances: usize) -> FleetConfig {
    FleetConfig {
        cluster: ClusterConfig {
            max_instances,
            region: "us-west-2".to_string(),
            security_group: "sg-test".to_string(),
            image: "ami-test".to_string(),
            disk_type: "gp3".to_string(),
            disk_space_gib: 50,
            ..ClusterConfig::default()
        },
        timing: TimingConfig::default(),
    }
}

fn start_with(
    max_instances: usize,
    shapes: Vec<InstanceShape>,
    store: StateStore,
) -> (Arc<Cluster>, Arc<SimProvider>) {
    start_config(&config(max_instances), shapes, store)
}

fn start_config(
    config: &FleetConfig,
    shapes: Vec<InstanceShape>,
    store: StateStore,
) -> (Arc<Cluster>, Arc<SimProvider>) {
    let sim = Arc::new(SimProvider::new());
    let cluster = Cluster::start(
        config,
        &Catalog::new(shapes),
        sim.clone(),
        Arc::new(LocalConnector),
        store,
    )
    .expect("cluster starts");
    (Arc::new(cluster), sim)
}

fn start(max_instances: usize, shapes: Vec<InstanceShape>) -> (Arc<Cluster>, Arc<SimProvider>) {
    start_with(max_instances, shapes, StateStore::open_in_memory().unwrap())
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fleet_ceiling_of_one_never_launches_a_second_instance() {
    let (cluster, sim) = start(1, vec![shape("one", 1.0)]);

    let mut callers = JoinSet::new();
    for _ in 0..2 {
        let cluster = cluster.clone();
        callers.spawn(async move { cluster.allocate(&cpu(1.0), &Labels::new()).await });
    }

    let first = timeout(Duration::from_secs(30), callers.join_next())
        .await
        .expect("one caller is served by the launch")
        .expect("a caller finished")
        .expect("caller task did not panic")
        .expect("allocation succeeded");
    assert_eq!(first.resources.get(CPU), 1.0);

    let second = timeout(Duration::from_secs(300), callers.join_next()).await;
    assert!(second.is_err(), "no capacity is left for the second caller");
    assert_eq!(sim.launch_count(), 1);
    assert_eq!(cluster.size(), 1);
    assert_eq!(cluster.instances().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_shape_is_demoted_and_replaced() {
    let (cluster, sim) = start(4, vec![shape("small", 1.0), shape("big", 4.0)]);
    sim.mark_unavailable("small");

    let alloc = timeout(
        Duration::from_secs(60),
        cluster.allocate(&cpu(1.0), &Labels::new()),
    )
    .await
    .expect("allocation completes")
    .expect("allocation succeeded");

    assert_eq!(alloc.resources.get(CPU), 1.0);
    assert_eq!(sim.attempts(), vec!["small", "big"]);
    assert!(cluster.tracker().is_demoted("small"));

    let instances = cluster.instances().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances.values().next().unwrap().instance_type, "big");

    let status = cluster.status();
    assert_eq!(status.failed, 1);
    assert_eq!(status.launched, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_returns_promptly_and_is_never_signalled() {
    let (cluster, sim) = start(2, vec![shape("one", 1.0)]);

    let started = Instant::now();
    let err = cluster
        .allocate_until(
            &cpu(1.0),
            &Labels::new(),
            tokio::time::sleep(Duration::from_millis(500)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));

    // Let the launch that was already in flight complete.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = cluster.status();
    assert_eq!(sim.launch_count(), 1);
    assert_eq!(status.launched, 1);
    assert_eq!(status.satisfied, 0);
    assert_eq!(status.waiters, 0);
}

// ── Supporting behavior ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn running_capacity_is_used_before_growing() {
    let (cluster, sim) = start(4, vec![shape("quad", 4.0)]);

    let a = cluster.allocate(&cpu(1.0), &Labels::new()).await.unwrap();
    let b = cluster.allocate(&cpu(2.0), &Labels::new()).await.unwrap();
    assert_eq!(a.pool, b.pool);
    assert_eq!(sim.launch_count(), 1);
    assert_eq!(cluster.available().await.unwrap().get(CPU), 1.0);

    cluster.free(&a.id).await.unwrap();
    assert_eq!(cluster.available().await.unwrap().get(CPU), 2.0);
}

#[tokio::test(start_paused = true)]
async fn elastic_request_takes_up_to_its_maximum() {
    let (cluster, _sim) = start(4, vec![shape("quad", 4.0)]);
    let req = Requirements::new(
        Resources::new().with(CPU, 1.0),
        Resources::new().with(CPU, 8.0),
    );
    let alloc = cluster.allocate(&req, &Labels::new()).await.unwrap();
    assert_eq!(alloc.resources.get(CPU), 4.0);
}

#[tokio::test(start_paused = true)]
async fn terminated_instance_is_evicted() {
    let (cluster, sim) = start(4, vec![shape("one", 1.0)]);
    let alloc = cluster.allocate(&cpu(1.0), &Labels::new()).await.unwrap();
    assert_eq!(cluster.size(), 1);

    sim.set_state(&alloc.pool, InstanceLifecycle::Terminated);
    let evicted = cluster.reconcile().await.unwrap();
    assert_eq!(evicted, vec![alloc.pool.clone()]);
    assert_eq!(cluster.size(), 0);
    assert!(cluster.instances().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn instances_recorded_by_another_cluster_become_visible() {
    let store = StateStore::open_in_memory().unwrap();
    let (first, _) = start_with(4, vec![shape("one", 1.0)], store.clone());
    let (second, _) = start_with(4, vec![shape("one", 1.0)], store);

    first.allocate(&cpu(1.0), &Labels::new()).await.unwrap();
    assert_eq!(first.size(), 1);
    assert_eq!(second.size(), 0);

    // The refresh cadence defaults to 10s.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(second.size(), 1);
}

#[tokio::test(start_paused = true)]
async fn existing_instances_are_loaded_at_start() {
    let store = StateStore::open_in_memory().unwrap();
    {
        let (cluster, _) = start_with(4, vec![shape("one", 1.0)], store.clone());
        cluster.allocate(&cpu(1.0), &Labels::new()).await.unwrap();
        cluster.shutdown();
    }
    let (restarted, _) = start_with(4, vec![shape("one", 1.0)], store);
    assert_eq!(restarted.size(), 1);
}

// ── Blocked demand ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn demoted_only_shape_is_retried_after_the_window() {
    let mut cfg = config(2);
    cfg.timing.demotion_window = "2m".to_string();
    cfg.timing.recheck_interval = "30s".to_string();
    let (cluster, sim) = start_config(
        &cfg,
        vec![shape("one", 1.0)],
        StateStore::open_in_memory().unwrap(),
    );
    sim.mark_unavailable("one");

    let caller = {
        let cluster = cluster.clone();
        tokio::spawn(async move { cluster.allocate(&cpu(1.0), &Labels::new()).await })
    };

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sim.attempts(), vec!["one"]);
    assert!(cluster.tracker().is_demoted("one"));
    assert_eq!(cluster.status().waiters, 1);

    sim.mark_available("one");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sim.attempts(), vec!["one"], "no launch while the shape is demoted");

    let alloc = timeout(Duration::from_secs(300), caller)
        .await
        .expect("caller is served once the demotion expires")
        .unwrap()
        .unwrap();
    assert_eq!(alloc.resources.get(CPU), 1.0);
    assert_eq!(sim.attempts(), vec!["one", "one"]);
    assert!(!cluster.tracker().is_demoted("one"));
}

#[tokio::test(start_paused = true)]
async fn ceiling_blocked_launch_proceeds_after_eviction() {
    let (cluster, sim) = start(1, vec![shape("one", 1.0)]);
    let held = cluster.allocate(&cpu(1.0), &Labels::new()).await.unwrap();

    let caller = {
        let cluster = cluster.clone();
        tokio::spawn(async move { cluster.allocate(&cpu(1.0), &Labels::new()).await })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sim.launch_count(), 1);
    assert_eq!(cluster.status().waiters, 1);

    sim.set_state(&held.pool, InstanceLifecycle::Terminated);
    assert_eq!(cluster.reconcile().await.unwrap(), vec![held.pool.clone()]);

    let alloc = timeout(Duration::from_secs(120), caller)
        .await
        .expect("caller is served once a slot frees up")
        .unwrap()
        .unwrap();
    assert_ne!(alloc.pool, held.pool);
    assert_eq!(sim.launch_count(), 2);
    assert_eq!(cluster.size(), 1);
}
