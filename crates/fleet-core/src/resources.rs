//! Resource vectors and elastic requirements.
//!
//! A `Resources` value maps a resource kind (`cpu`, `mem`, `disk`, or any
//! custom name) to a non-negative quantity. Missing kinds count as zero.
//! Memory and disk are measured in bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Number of virtual CPUs.
pub const CPU: &str = "cpu";
/// Memory in bytes.
pub const MEM: &str = "mem";
/// Disk space in bytes.
pub const DISK: &str = "disk";

const GIB: f64 = (1u64 << 30) as f64;
const TIB: f64 = (1u64 << 40) as f64;

/// A mapping from resource kind to quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(BTreeMap<String, f64>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, kind: &str, amount: f64) -> Self {
        self.set(kind, amount);
        self
    }

    /// Quantity of `kind`, zero when absent.
    pub fn get(&self, kind: &str) -> f64 {
        self.0.get(kind).copied().unwrap_or(0.0)
    }

    /// Set the quantity of `kind`. Negative amounts are clamped to zero.
    pub fn set(&mut self, kind: &str, amount: f64) {
        self.0.insert(kind.to_string(), amount.max(0.0));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// True when every component is zero.
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0.0)
    }

    /// Component-wise subtraction, clamped at zero.
    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        let mut out = self.clone();
        for (kind, amount) in &other.0 {
            let current = out.get(kind);
            out.set(kind, current - amount);
        }
        out
    }

    /// Component-wise minimum over the union of both key sets.
    pub fn component_min(&self, other: &Resources) -> Resources {
        let mut out = Resources::new();
        for kind in self.0.keys().chain(other.0.keys()) {
            out.set(kind, self.get(kind).min(other.get(kind)));
        }
        out
    }

    /// True when every component of `self` is less than or equal to the
    /// corresponding component of `other`.
    pub fn le_all(&self, other: &Resources) -> bool {
        self.0.iter().all(|(kind, amount)| *amount <= other.get(kind))
    }

    /// Euclidean distance between two vectors after scaling each kind to a
    /// comparable magnitude: CPUs as-is, memory in GiB, disk in TiB. Custom
    /// kinds are unscaled. `None` measures the distance from zero.
    pub fn scaled_distance(&self, other: Option<&Resources>) -> f64 {
        let zero = Resources::new();
        let other = other.unwrap_or(&zero);
        let mut sum = 0.0;
        for kind in self.0.keys().chain(other.0.keys().filter(|k| !self.0.contains_key(*k))) {
            let delta = (self.get(kind) - other.get(kind)) * scale(kind);
            sum += delta * delta;
        }
        sum.sqrt()
    }
}

fn scale(kind: &str) -> f64 {
    match kind {
        MEM => 1.0 / GIB,
        DISK => 1.0 / TIB,
        _ => 1.0,
    }
}

impl Add<&Resources> for &Resources {
    type Output = Resources;

    fn add(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        for (kind, amount) in &rhs.0 {
            let current = self.get(kind);
            self.set(kind, current + amount);
        }
    }
}

impl FromIterator<(String, f64)> for Resources {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut out = Resources::new();
        for (kind, amount) in iter {
            out.set(&kind, amount);
        }
        out
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (kind, amount)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match kind.as_str() {
                MEM | DISK => write!(f, "{kind}:{:.1}GiB", amount / GIB)?,
                _ => write!(f, "{kind}:{amount}")?,
            }
        }
        write!(f, "}}")
    }
}

/// An elastic request: at least `min`, up to `max`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    pub min: Resources,
    pub max: Resources,
}

impl Requirements {
    /// Build a requirement, raising `max` wherever it falls below `min` so
    /// that `min <= max` holds component-wise.
    pub fn new(min: Resources, max: Resources) -> Self {
        let mut max = max;
        for (kind, amount) in min.iter() {
            if max.get(kind) < amount {
                max.set(kind, amount);
            }
        }
        Self { min, max }
    }

    /// A requirement whose min and max coincide.
    pub fn exact(resources: Resources) -> Self {
        Self {
            min: resources.clone(),
            max: resources,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.le_all(&self.max)
    }
}

impl fmt::Display for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.min, self.max)
    }
}
