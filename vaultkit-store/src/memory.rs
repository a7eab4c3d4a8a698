//! In-memory store for tests and ephemeral contexts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreResult;
use crate::store::LocalStore;

/// A [`LocalStore`] backed by a mutex-guarded map.
///
/// Used by foreground contexts that never persist anything and by tests.
/// Batches are trivially atomic because the map lock spans the whole batch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A poisoned lock only means a writer panicked mid-batch; the map itself
    // is still structurally valid, so recover it instead of propagating.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set_many(&self, entries: &[(&str, &[u8])]) -> StoreResult<()> {
        let mut map = self.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.to_vec());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> StoreResult<()> {
        let mut map = self.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.lock().clear();
        Ok(())
    }
}
