//! Instance shapes, live instance descriptors, and provider lifecycle states.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// Unique identifier for a provider instance.
pub type InstanceId = String;

/// Free-form key/value labels attached to instances and allocations.
pub type Labels = BTreeMap<String, String>;

// ── Shapes ─────────────────────────────────────────────────────────

/// A named instance configuration with fixed capacity and regional prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceShape {
    /// Provider type identifier, e.g. `c5.2xlarge`.
    pub instance_type: String,
    /// Capacity offered by one instance of this shape.
    pub resources: Resources,
    /// Hourly on-demand price keyed by region.
    pub prices: BTreeMap<String, f64>,
    /// Whether the shape may be launched at spot prices.
    pub spot_eligible: bool,
}

impl InstanceShape {
    /// Hourly price in `region`, if the shape is offered there.
    pub fn price(&self, region: &str) -> Option<f64> {
        self.prices.get(region).copied()
    }
}

// ── Live instances ─────────────────────────────────────────────────

/// A running instance as recorded in the durable instance set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveInstance {
    pub id: InstanceId,
    pub instance_type: String,
    /// Public DNS name or address of the worker.
    pub address: String,
    /// Capacity of the instance at launch.
    pub resources: Resources,
    pub region: String,
    /// Hourly price paid at launch.
    pub price: f64,
    pub spot: bool,
    pub labels: Labels,
    /// Unix timestamp (seconds) of launch completion.
    pub launched_at: u64,
}

// ── Lifecycle ──────────────────────────────────────────────────────

/// Provider-reported lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceLifecycle {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceLifecycle {
    /// True for states from which the instance will not serve work again.
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            Self::ShuttingDown | Self::Terminated | Self::Stopping | Self::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
