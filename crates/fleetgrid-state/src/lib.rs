//! fleetgrid-state — the durable instance set.
//!
//! Backed by [redb](https://docs.rs/redb). The set maps instance ids to
//! `LiveInstance` descriptors and is the single source of truth for which
//! capacity exists. It may be shared by several cooperating processes, so
//! every read-modify-write goes through an exclusive [`StateLock`].
//!
//! # Locking
//!
//! The in-memory backend serializes writers through redb's write
//! transaction. The file backend additionally holds the database file's
//! exclusive lock for the duration of each operation, so independent
//! processes pointing at the same file take turns.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{InstanceSet, StateLock, StateStore};
