//! Process-local snapshot store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::SnapshotStore;
use crate::errors::StoreError;
use crate::models::{ContentSnapshot, SnapshotKey};

/// In-memory [`SnapshotStore`] backed by a mutex-guarded `HashMap`.
///
/// Construct one per job session (or per test) instead of sharing a global.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<SnapshotKey, ContentSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// If the mutex is poisoned the map is recovered rather than propagating
    /// the panic; every write replaces a whole record so the map stays
    /// consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<SnapshotKey, ContentSnapshot>> {
        self.snapshots.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("snapshot store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, snapshot: ContentSnapshot) -> Result<(), StoreError> {
        let key = snapshot.key();
        if self.lock().insert(key.clone(), snapshot).is_some() {
            debug!(%key, "overwrote existing snapshot");
        }
        Ok(())
    }

    fn get(&self, key: &SnapshotKey) -> Result<Option<ContentSnapshot>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn remove(&self, key: &SnapshotKey) -> Result<bool, StoreError> {
        Ok(self.lock().remove(key).is_some())
    }

    fn reset(&self) -> Result<(), StoreError> {
        let mut map = self.lock();
        debug!(count = map.len(), "resetting in-memory snapshot store");
        map.clear();
        Ok(())
    }
}
