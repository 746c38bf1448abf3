//! Demand packing — groups outstanding requests into planned launches.
//!
//! Requests are ordered by ascending scaled distance of their minimum
//! (small requests first) and accumulated greedily. The running total keeps
//! growing while some shape still covers it; once the next request would
//! make it unsatisfiable, the current bucket is closed with the last shape
//! that fit and a new accumulation starts at that request. Requests with
//! equal distance keep their input order.
//!
//! ```text
//! demands (sorted):  1  1  2  |  4  |  9(unsatisfiable)
//! buckets:           [1,1,2]→medium  [4]→medium  skip 9
//! ```

use tracing::debug;

use fleet_core::{InstanceShape, Resources};

/// One launch covering a group of requests.
#[derive(Debug, Clone)]
pub struct PlannedLaunch {
    pub shape: InstanceShape,
    /// Indices into the demand slice passed to [`pack`].
    pub members: Vec<usize>,
    /// Sum of the members' demands.
    pub need: Resources,
}

/// Outcome of a packing pass.
#[derive(Debug, Clone, Default)]
pub struct Packing {
    pub launches: Vec<PlannedLaunch>,
    /// Requests that no currently selectable shape can satisfy on their own.
    pub skipped: Vec<usize>,
}

/// Pack `demands` into launches using `select` to find the minimal shape
/// covering an accumulated need.
pub fn pack<F>(demands: &[Resources], mut select: F) -> Packing
where
    F: FnMut(&Resources) -> Option<InstanceShape>,
{
    let mut order: Vec<usize> = (0..demands.len()).collect();
    order.sort_by(|&a, &b| {
        demands[a]
            .scaled_distance(None)
            .total_cmp(&demands[b].scaled_distance(None))
            .then(a.cmp(&b))
    });

    let mut packing = Packing::default();
    let mut i = 0;
    while i < order.len() {
        let first = order[i];
        i += 1;
        let mut need = demands[first].clone();
        let Some(mut best) = select(&need) else {
            debug!(demand = %need, "no available instance type can satisfy demand");
            packing.skipped.push(first);
            continue;
        };
        let mut members = vec![first];
        while i < order.len() {
            let candidate = &need + &demands[order[i]];
            match select(&candidate) {
                Some(shape) => {
                    need = candidate;
                    best = shape;
                    members.push(order[i]);
                    i += 1;
                }
                None => break,
            }
        }
        packing.launches.push(PlannedLaunch {
            shape: best,
            members,
            need,
        });
    }
    packing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{AvailabilityTracker, DEFAULT_DEMOTION_WINDOW};
    use fleet_core::CPU;
    use std::collections::BTreeMap;

    fn shape(ty: &str, cpu: f64) -> InstanceShape {
        InstanceShape {
            instance_type: ty.to_string(),
            resources: Resources::new().with(CPU, cpu),
            prices: BTreeMap::from([("us-west-2".to_string(), 0.1)]),
            spot_eligible: true,
        }
    }

    fn cpu(n: f64) -> Resources {
        Resources::new().with(CPU, n)
    }

    fn tracker(sizes: &[(&str, f64)]) -> AvailabilityTracker {
        AvailabilityTracker::new(
            sizes.iter().map(|(t, c)| shape(t, *c)).collect(),
            DEFAULT_DEMOTION_WINDOW,
        )
    }

    #[test]
    fn exact_fit_produces_one_launch() {
        let t = tracker(&[("small", 2.0), ("big", 8.0)]);
        let demands = vec![cpu(2.0), cpu(1.0), cpu(4.0), cpu(1.0)];

        let packing = pack(&demands, |need| t.select_minimal(need, false));

        assert_eq!(packing.launches.len(), 1);
        let launch = &packing.launches[0];
        assert_eq!(launch.shape.instance_type, "big");
        assert_eq!(launch.need.get(CPU), 8.0);
        let mut members = launch.members.clone();
        members.sort();
        assert_eq!(members, vec![0, 1, 2, 3]);
        assert!(packing.skipped.is_empty());
    }

    #[test]
    fn overflow_starts_new_bucket_with_breaking_demand() {
        let t = tracker(&[("small", 2.0), ("big", 4.0)]);
        let demands = vec![cpu(3.0), cpu(1.0), cpu(2.0)];

        let packing = pack(&demands, |need| t.select_minimal(need, false));

        // sorted: 1, 2, 3 → [1,2]=3→big, [3]→big
        assert_eq!(packing.launches.len(), 2);
        assert_eq!(packing.launches[0].members, vec![1, 2]);
        assert_eq!(packing.launches[0].shape.instance_type, "big");
        assert_eq!(packing.launches[1].members, vec![0]);
        assert_eq!(packing.launches[1].shape.instance_type, "big");
    }

    #[test]
    fn unsatisfiable_demand_is_skipped_without_blocking_others() {
        let t = tracker(&[("small", 2.0)]);
        let demands = vec![cpu(64.0), cpu(1.0), cpu(1.0), cpu(1.0)];

        let packing = pack(&demands, |need| t.select_minimal(need, false));

        assert_eq!(packing.skipped, vec![0]);
        assert_eq!(packing.launches.len(), 2);
        assert_eq!(packing.launches[0].members, vec![1, 2]);
        assert_eq!(packing.launches[1].members, vec![3]);
        for launch in &packing.launches {
            assert!(!launch.members.contains(&0));
        }
    }

    #[test]
    fn equal_demands_keep_input_order() {
        let t = tracker(&[("one", 1.0)]);
        let demands = vec![cpu(1.0), cpu(1.0), cpu(1.0)];

        let packing = pack(&demands, |need| t.select_minimal(need, false));

        let members: Vec<_> = packing.launches.iter().map(|l| l.members[0]).collect();
        assert_eq!(members, vec![0, 1, 2]);
    }

    #[test]
    fn empty_demand_plans_nothing() {
        let t = tracker(&[("one", 1.0)]);
        let packing = pack(&[], |need| t.select_minimal(need, false));
        assert!(packing.launches.is_empty());
        assert!(packing.skipped.is_empty());
    }
}
