//! fleetgrid instance selection — catalog, availability, packing.
//!
//! This crate decides *which* instance shapes could serve demand. It does
//! not launch anything; the grower in `fleetgrid-cluster` executes the
//! plans produced here.
//!
//! # Components
//!
//! - **`catalog`** — candidate shapes and the admissibility policy
//! - **`tracker`** — smallest-sufficient selection with timed demotion
//! - **`packer`** — greedy packing of outstanding demand into launches

pub mod catalog;
pub mod packer;
pub mod tracker;

pub use catalog::{AdmissionPolicy, Catalog};
pub use packer::{Packing, PlannedLaunch, pack};
pub use tracker::AvailabilityTracker;
