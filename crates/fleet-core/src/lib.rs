//! fleet-core — types shared by every fleetgrid crate.
//!
//! - **`resources`** — resource vectors and elastic (min, max) requirements
//! - **`types`** — instance shapes, live instance descriptors, lifecycle states
//! - **`config`** — `fleet.toml` parsing and validation

pub mod config;
pub mod resources;
pub mod types;

pub use config::{ClusterConfig, ConfigError, FleetConfig, TimingConfig, Timings, parse_duration};
pub use resources::{CPU, DISK, MEM, Requirements, Resources};
pub use types::*;
