//! In-process pools.
//!
//! `LocalPool` keeps reservations in memory against a fixed capacity. The
//! matching `LocalConnector` builds one per live instance from the
//! instance's recorded capacity, which makes it usable wherever a worker
//! protocol is not available (tests, standalone runs).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use fleet_core::{Labels, LiveInstance, Requirements, Resources};

use crate::error::{PoolError, PoolResult};
use crate::pool::{Alloc, Pool, PoolConnector};

pub struct LocalPool {
    id: String,
    address: String,
    capacity: Resources,
    allocs: Mutex<HashMap<String, Alloc>>,
    next: AtomicU64,
}

impl LocalPool {
    pub fn new(id: &str, address: &str, capacity: Resources) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            capacity,
            allocs: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    fn allocs(&self) -> MutexGuard<'_, HashMap<String, Alloc>> {
        self.allocs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unreserved(allocs: &HashMap<String, Alloc>, capacity: &Resources) -> Resources {
        allocs
            .values()
            .fold(capacity.clone(), |left, a| left.saturating_sub(&a.resources))
    }

    pub fn capacity(&self) -> &Resources {
        &self.capacity
    }

    pub fn alloc_count(&self) -> usize {
        self.allocs().len()
    }
}

#[async_trait]
impl Pool for LocalPool {
    fn id(&self) -> &str {
        &self.id
    }

    async fn available(&self) -> PoolResult<Resources> {
        Ok(Self::unreserved(&self.allocs(), &self.capacity))
    }

    async fn allocate(&self, req: &Requirements, labels: &Labels) -> PoolResult<Alloc> {
        let mut allocs = self.allocs();
        let available = Self::unreserved(&allocs, &self.capacity);
        if !req.min.le_all(&available) {
            return Err(PoolError::Insufficient {
                pool: self.id.clone(),
                requested: req.min.to_string(),
                available: available.to_string(),
            });
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let alloc = Alloc {
            id: format!("{}/{n}", self.id),
            pool: self.id.clone(),
            address: self.address.clone(),
            resources: req.max.component_min(&available),
            labels: labels.clone(),
        };
        allocs.insert(alloc.id.clone(), alloc.clone());
        debug!(pool = %self.id, alloc = %alloc.id, resources = %alloc.resources, "allocated");
        Ok(alloc)
    }

    async fn free(&self, alloc_id: &str) -> PoolResult<()> {
        match self.allocs().remove(alloc_id) {
            Some(_) => Ok(()),
            None => Err(PoolError::UnknownAlloc(alloc_id.to_string())),
        }
    }
}

/// Builds a [`LocalPool`] sized to each instance's capacity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

impl PoolConnector for LocalConnector {
    fn connect(&self, instance: &LiveInstance) -> PoolResult<Arc<dyn Pool>> {
        if instance.address.is_empty() {
            return Err(PoolError::Connect {
                address: String::new(),
                reason: format!("instance {} has no address", instance.id),
            });
        }
        Ok(Arc::new(LocalPool::new(
            &instance.id,
            &instance.address,
            instance.resources.clone(),
        )))
    }
}
