//! Availability tracker — smallest-sufficient shape selection.
//!
//! Shapes that the provider failed to launch are demoted for a cool-down
//! window. Demotions carry an expiry instant that is checked lazily at
//! selection time; nothing runs in the background.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use fleet_core::{InstanceShape, Resources};

/// Default cool-down applied to a demoted shape.
pub const DEFAULT_DEMOTION_WINDOW: Duration = Duration::from_secs(5 * 60);

pub struct AvailabilityTracker {
    /// Admissible shapes ordered by (scaled distance, type id).
    shapes: Vec<InstanceShape>,
    window: Duration,
    /// instance type → demotion expiry.
    demoted: Mutex<HashMap<String, Instant>>,
}

impl AvailabilityTracker {
    pub fn new(mut shapes: Vec<InstanceShape>, window: Duration) -> Self {
        shapes.sort_by(|a, b| {
            a.resources
                .scaled_distance(None)
                .total_cmp(&b.resources.scaled_distance(None))
                .then_with(|| a.instance_type.cmp(&b.instance_type))
        });
        Self {
            shapes,
            window,
            demoted: Mutex::new(HashMap::new()),
        }
    }

    /// Admissible shapes, smallest first.
    pub fn shapes(&self) -> &[InstanceShape] {
        &self.shapes
    }

    fn demotions(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.demoted.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The smallest currently-available shape whose capacity covers `need`
    /// in every dimension, restricted to spot-eligible shapes when
    /// `spot_only` is set.
    pub fn select_minimal(&self, need: &Resources, spot_only: bool) -> Option<InstanceShape> {
        let mut demoted = self.demotions();
        let now = Instant::now();
        demoted.retain(|_, expiry| *expiry > now);
        self.shapes
            .iter()
            .filter(|s| !spot_only || s.spot_eligible)
            .filter(|s| !demoted.contains_key(&s.instance_type))
            .find(|s| need.le_all(&s.resources))
            .cloned()
    }

    /// Make `shape` ineligible for selection until the window elapses.
    pub fn demote(&self, shape: &InstanceShape) {
        let expiry = Instant::now() + self.window;
        self.demotions().insert(shape.instance_type.clone(), expiry);
        info!(
            instance_type = %shape.instance_type,
            window_secs = self.window.as_secs(),
            "instance type demoted"
        );
    }

    pub fn is_demoted(&self, instance_type: &str) -> bool {
        self.demotions()
            .get(instance_type)
            .is_some_and(|expiry| *expiry > Instant::now())
    }

    /// Whether any admissible shape could ever satisfy `need`, ignoring
    /// demotions.
    pub fn is_satisfiable(&self, need: &Resources) -> bool {
        self.shapes.iter().any(|s| need.le_all(&s.resources))
    }
}
