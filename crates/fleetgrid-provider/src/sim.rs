//! Simulated provider for tests and standalone runs.
//!
//! Launches complete after a configurable delay and produce instances with
//! the requested shape's capacity. Tests can make instance types
//! unavailable, inject failures, and change the lifecycle state the
//! provider reports for any instance.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info};

use fleet_core::{InstanceId, InstanceLifecycle, LiveInstance};

use crate::error::{LaunchError, ProviderError};
use crate::provider::{InstanceStatus, LaunchRequest, MAX_DESCRIBE_IDS, Provider};

#[derive(Default)]
struct SimState {
    /// Instances the provider knows about.
    instances: BTreeMap<InstanceId, InstanceLifecycle>,
    unavailable: HashSet<String>,
    /// Number of upcoming launches that fail with a generic error.
    launch_failures: usize,
    /// Number of upcoming describe calls that fail.
    describe_failures: usize,
    /// Extra records returned by every describe call.
    strays: Vec<InstanceStatus>,
    /// Instance type of every launch attempt, in order.
    attempts: Vec<String>,
}

/// In-process provider.
pub struct SimProvider {
    state: Mutex<SimState>,
    launch_delay: Duration,
    describe_limit: usize,
    next_id: AtomicU64,
    describe_calls: AtomicUsize,
}

impl SimProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            launch_delay: Duration::from_secs(1),
            describe_limit: MAX_DESCRIBE_IDS,
            next_id: AtomicU64::new(1),
            describe_calls: AtomicUsize::new(0),
        }
    }

    /// Time a launch takes before it completes.
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Page size limit enforced on describe calls.
    pub fn with_describe_limit(mut self, limit: usize) -> Self {
        self.describe_limit = limit;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Launches of `instance_type` fail as unavailable until cleared.
    pub fn mark_unavailable(&self, instance_type: &str) {
        self.state().unavailable.insert(instance_type.to_string());
    }

    pub fn mark_available(&self, instance_type: &str) {
        self.state().unavailable.remove(instance_type);
    }

    /// The next `n` launches fail with a generic error.
    pub fn fail_next_launches(&self, n: usize) {
        self.state().launch_failures = n;
    }

    /// The next `n` describe calls fail.
    pub fn fail_next_describes(&self, n: usize) {
        self.state().describe_failures = n;
    }

    /// Register an instance that was not launched through this provider.
    pub fn insert(&self, id: &str, state: InstanceLifecycle) {
        self.state().instances.insert(id.to_string(), state);
    }

    /// Change the lifecycle state reported for `id`.
    pub fn set_state(&self, id: &str, state: InstanceLifecycle) {
        self.state().instances.insert(id.to_string(), state);
    }

    /// Stop reporting `id` at all.
    pub fn forget(&self, id: &str) {
        self.state().instances.remove(id);
    }

    /// Add a record returned by every describe call regardless of the ids asked.
    pub fn add_stray(&self, id: &str, state: InstanceLifecycle) {
        self.state().strays.push(InstanceStatus {
            id: id.to_string(),
            state,
        });
    }

    /// Instance type of every launch attempt so far.
    pub fn attempts(&self) -> Vec<String> {
        self.state().attempts.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.state().attempts.len()
    }

    pub fn describe_count(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    fn next_instance_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("i-{n:017x}")
    }
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for SimProvider {
    async fn launch(&self, request: &LaunchRequest) -> Result<LiveInstance, LaunchError> {
        let instance_type = request.shape.instance_type.clone();
        self.state().attempts.push(instance_type.clone());
        debug!(%instance_type, price = request.price, "sim launch started");

        tokio::time::sleep(self.launch_delay).await;

        let mut state = self.state();
        if state.unavailable.contains(&instance_type) {
            return Err(LaunchError::Unavailable {
                instance_type,
                region: request.params.region.clone(),
                reason: "insufficient capacity".to_string(),
            });
        }
        if state.launch_failures > 0 {
            state.launch_failures -= 1;
            return Err(LaunchError::Failed(format!(
                "simulated failure launching {instance_type}"
            )));
        }

        let id = self.next_instance_id();
        state.instances.insert(id.clone(), InstanceLifecycle::Running);
        drop(state);

        info!(%id, %instance_type, "sim instance running");
        Ok(LiveInstance {
            address: format!("{id}.sim.internal"),
            id,
            instance_type,
            resources: request.shape.resources.clone(),
            region: request.params.region.clone(),
            price: request.price,
            spot: request.params.spot,
            labels: request.params.labels.clone(),
            launched_at: epoch_secs(),
        })
    }

    async fn describe(&self, ids: &[InstanceId]) -> Result<Vec<InstanceStatus>, ProviderError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if ids.len() > self.describe_limit {
            return Err(ProviderError::TooManyIds {
                got: ids.len(),
                limit: self.describe_limit,
            });
        }
        let mut state = self.state();
        if state.describe_failures > 0 {
            state.describe_failures -= 1;
            return Err(ProviderError::Describe("simulated describe failure".to_string()));
        }
        let mut statuses: Vec<InstanceStatus> = ids
            .iter()
            .filter_map(|id| {
                state.instances.get(id).map(|s| InstanceStatus {
                    id: id.clone(),
                    state: *s,
                })
            })
            .collect();
        statuses.extend(state.strays.iter().cloned());
        Ok(statuses)
    }

    fn max_describe_ids(&self) -> usize {
        self.describe_limit
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
