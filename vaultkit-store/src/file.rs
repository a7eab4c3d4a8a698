//! File-backed store with atomic batch writes.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;

/// A [`LocalStore`] persisted as a single CBOR file.
///
/// Every batch rewrites the file through a sibling temp file that is synced
/// to disk and then renamed over the target, so a crash mid-write leaves the
/// previous file intact and a batch is never partially visible. A mutex
/// serializes the read-modify-write cycles of concurrent batches.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileStore {
    /// Creates a store persisted at `path`. The file (and its parent
    /// directories) are created lazily on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(err.into()),
        };
        ciborium::de::from_reader(bytes.as_slice())
            .map_err(|err| StoreError::Codec(err.to_string()))
    }

    fn persist(&self, map: &BTreeMap<String, Vec<u8>>) -> StoreResult<()> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(map, &mut bytes)
            .map_err(|err| StoreError::Codec(err.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Temp file lives next to the target so the rename stays on one
        // filesystem and is atomic. The sync must happen before the rename;
        // otherwise a crash can promote a partially written temp file to the
        // final name.
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        self.sync_parent_dir()
    }

    // Makes the rename itself durable.
    #[cfg(unix)]
    fn sync_parent_dir(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }

    // Directory handles cannot be synced here; the rename is still atomic on
    // modern filesystems.
    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let _guard = self.guard();
        Ok(self.load()?.remove(key))
    }

    fn set_many(&self, entries: &[(&str, &[u8])]) -> StoreResult<()> {
        let _guard = self.guard();
        let mut map = self.load()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.to_vec());
        }
        self.persist(&map)
    }

    fn remove_many(&self, keys: &[&str]) -> StoreResult<()> {
        let _guard = self.guard();
        let mut map = self.load()?;
        let mut changed = false;
        for key in keys {
            changed |= map.remove(*key).is_some();
        }
        if changed {
            self.persist(&map)?;
        }
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let _guard = self.guard();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
