//! Instance catalog — candidate shapes and admissibility.
//!
//! The built-in catalog covers general purpose, compute and memory
//! optimized families. Prices are hourly on-demand rates. Memory is in
//! bytes; disk capacity is not part of a shape and is injected per node by
//! the admission policy.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use fleet_core::{CPU, ClusterConfig, DISK, InstanceShape, MEM, Resources};

const GIB: f64 = (1u64 << 30) as f64;

/// (type, vCPUs, memory GiB, us-west-2, us-east-1, eu-west-1, spot eligible)
const BUILTIN: &[(&str, f64, f64, f64, f64, f64, bool)] = &[
    ("t3.medium", 2.0, 4.0, 0.0416, 0.0416, 0.0456, false),
    ("m5.large", 2.0, 8.0, 0.096, 0.096, 0.107, true),
    ("m5.xlarge", 4.0, 16.0, 0.192, 0.192, 0.214, true),
    ("m5.2xlarge", 8.0, 32.0, 0.384, 0.384, 0.428, true),
    ("m5.4xlarge", 16.0, 64.0, 0.768, 0.768, 0.856, true),
    ("m5.12xlarge", 48.0, 192.0, 2.304, 2.304, 2.568, true),
    ("m5.24xlarge", 96.0, 384.0, 4.608, 4.608, 5.136, true),
    ("c5.large", 2.0, 4.0, 0.085, 0.085, 0.096, true),
    ("c5.xlarge", 4.0, 8.0, 0.17, 0.17, 0.192, true),
    ("c5.2xlarge", 8.0, 16.0, 0.34, 0.34, 0.384, true),
    ("c5.4xlarge", 16.0, 32.0, 0.68, 0.68, 0.768, true),
    ("c5.9xlarge", 36.0, 72.0, 1.53, 1.53, 1.728, true),
    ("c5.18xlarge", 72.0, 144.0, 3.06, 3.06, 3.456, true),
    ("r5.large", 2.0, 16.0, 0.126, 0.126, 0.141, true),
    ("r5.xlarge", 4.0, 32.0, 0.252, 0.252, 0.282, true),
    ("r5.2xlarge", 8.0, 64.0, 0.504, 0.504, 0.564, true),
    ("r5.4xlarge", 16.0, 128.0, 1.008, 1.008, 1.128, true),
    ("r5.12xlarge", 48.0, 384.0, 3.024, 3.024, 3.384, true),
    ("r5.24xlarge", 96.0, 768.0, 6.048, 6.048, 6.768, true),
    ("x1.16xlarge", 64.0, 976.0, 6.669, 6.669, 8.003, false),
    ("x1.32xlarge", 128.0, 1952.0, 13.338, 13.338, 16.006, false),
];

/// Static knowledge of candidate instance shapes.
#[derive(Debug, Clone)]
pub struct Catalog {
    shapes: Vec<InstanceShape>,
}

/// Which catalog shapes a cluster may launch, and how they are adjusted.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Allowed instance types. `None` admits every shape.
    pub allow: Option<BTreeSet<String>>,
    /// Disk capacity in bytes injected into every admitted shape.
    pub disk_bytes: f64,
    /// Shapes without a price in this region are not admitted.
    pub region: String,
}

impl AdmissionPolicy {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            allow: config
                .instance_types
                .as_ref()
                .map(|types| types.iter().cloned().collect()),
            disk_bytes: config.disk_bytes(),
            region: config.region.clone(),
        }
    }
}

impl Catalog {
    pub fn new(shapes: Vec<InstanceShape>) -> Self {
        Self { shapes }
    }

    /// The built-in catalog.
    pub fn builtin() -> Self {
        let shapes = BUILTIN
            .iter()
            .map(|&(ty, cpu, mem_gib, usw2, use1, euw1, spot)| InstanceShape {
                instance_type: ty.to_string(),
                resources: Resources::new().with(CPU, cpu).with(MEM, mem_gib * GIB),
                prices: BTreeMap::from([
                    ("us-west-2".to_string(), usw2),
                    ("us-east-1".to_string(), use1),
                    ("eu-west-1".to_string(), euw1),
                ]),
                spot_eligible: spot,
            })
            .collect();
        Self { shapes }
    }

    pub fn shapes(&self) -> &[InstanceShape] {
        &self.shapes
    }

    pub fn get(&self, instance_type: &str) -> Option<&InstanceShape> {
        self.shapes.iter().find(|s| s.instance_type == instance_type)
    }

    /// Shapes admitted by `policy`, each with the policy's disk capacity.
    pub fn admissible(&self, policy: &AdmissionPolicy) -> Vec<InstanceShape> {
        let mut admitted = Vec::new();
        for shape in &self.shapes {
            if let Some(allow) = &policy.allow
                && !allow.contains(&shape.instance_type)
            {
                continue;
            }
            if shape.price(&policy.region).is_none() {
                debug!(
                    instance_type = %shape.instance_type,
                    region = %policy.region,
                    "shape not priced in region, skipping"
                );
                continue;
            }
            let mut shape = shape.clone();
            shape.resources.set(DISK, policy.disk_bytes);
            admitted.push(shape);
        }
        admitted
    }
}
