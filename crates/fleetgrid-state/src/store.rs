//! StateStore — redb-backed persistence of the durable instance set.
//!
//! Reads go through [`StateStore::load`]. Every mutation is a
//! read-modify-write under an exclusive [`StateLock`]: take the lock, load
//! the set, change it, save it, release. [`StateStore::update`] wraps that
//! sequence. A lock must never be held across an `.await`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redb::{Database, ReadableDatabase, ReadableTable, TableError, WriteTransaction};
use tracing::debug;

use fleet_core::{InstanceId, LiveInstance};

use crate::error::{StateError, StateResult};
use crate::tables::INSTANCES;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// The durable instance set: instance id → live instance descriptor.
pub type InstanceSet = BTreeMap<InstanceId, LiveInstance>;

const LOCK_RETRY: Duration = Duration::from_millis(20);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
enum Backend {
    Memory(Arc<Database>),
    File { path: PathBuf, lock_timeout: Duration },
}

/// Lockable store for the durable instance set.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct StateStore {
    backend: Backend,
}

impl StateStore {
    /// Open (or create) a file-backed store at the given path.
    ///
    /// The database file is only held open while an operation runs, so
    /// other processes can share the same path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let store = Self {
            backend: Backend::File {
                path: path.to_path_buf(),
                lock_timeout: DEFAULT_LOCK_TIMEOUT,
            },
        };
        drop(store.database()?);
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and standalone runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        debug!("in-memory state store opened");
        Ok(Self {
            backend: Backend::Memory(Arc::new(db)),
        })
    }

    /// Bound how long a file-backed store waits for another holder to
    /// release the database before failing with [`StateError::Locked`].
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        if let Backend::File { lock_timeout, .. } = &mut self.backend {
            *lock_timeout = timeout;
        }
        self
    }

    fn database(&self) -> StateResult<Arc<Database>> {
        match &self.backend {
            Backend::Memory(db) => Ok(db.clone()),
            Backend::File { path, lock_timeout } => {
                open_exclusive(path, *lock_timeout).map(Arc::new)
            }
        }
    }

    /// Load the current instance set.
    ///
    /// Returns [`StateError::NoState`] when nothing was ever saved.
    pub fn load(&self) -> StateResult<InstanceSet> {
        let db = self.database()?;
        let txn = db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(INSTANCES) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Err(StateError::NoState),
            Err(e) => return Err(StateError::Table(e.to_string())),
        };
        let mut set = InstanceSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let instance: LiveInstance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            set.insert(key.value().to_string(), instance);
        }
        Ok(set)
    }

    /// Acquire the exclusive lock for a read-modify-write sequence.
    pub fn lock(&self) -> StateResult<StateLock> {
        let db = self.database()?;
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        Ok(StateLock { txn, _db: db })
    }

    /// Lock, load, apply `f`, save, and unlock. Returns the saved set.
    pub fn update<F>(&self, f: F) -> StateResult<InstanceSet>
    where
        F: FnOnce(&mut InstanceSet),
    {
        let lock = self.lock()?;
        let mut set = lock.load()?;
        f(&mut set);
        lock.save(&set)?;
        Ok(set)
    }
}

/// Open the database file, waiting while another holder has it open.
fn open_exclusive(path: &Path, timeout: Duration) -> StateResult<Database> {
    let deadline = Instant::now() + timeout;
    loop {
        match Database::create(path) {
            Ok(db) => return Ok(db),
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                if Instant::now() >= deadline {
                    return Err(StateError::Locked(path.display().to_string()));
                }
                std::thread::sleep(LOCK_RETRY);
            }
            Err(e) => return Err(StateError::Open(e.to_string())),
        }
    }
}

/// Exclusive hold on the durable set.
///
/// Dropping the lock without calling [`StateLock::save`] discards any
/// pending changes and releases it.
pub struct StateLock {
    // Declared first so the transaction ends before the database closes.
    txn: WriteTransaction,
    _db: Arc<Database>,
}

impl StateLock {
    /// Load the set as seen under the lock. A store that was never written
    /// yields an empty set.
    pub fn load(&self) -> StateResult<InstanceSet> {
        let table = self.txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut set = InstanceSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let instance: LiveInstance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            set.insert(key.value().to_string(), instance);
        }
        Ok(set)
    }

    /// Replace the persisted set with `set`, commit, and release the lock.
    pub fn save(self, set: &InstanceSet) -> StateResult<()> {
        let StateLock { txn, _db } = self;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let stale: Vec<String> = table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    (!set.contains_key(&k)).then_some(k)
                })
                .collect();
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for (id, instance) in set {
                let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
                table
                    .insert(id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instances = set.len(), "instance set saved");
        Ok(())
    }
}
