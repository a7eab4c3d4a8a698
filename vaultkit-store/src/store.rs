//! The durable key/value store boundary.

use crate::error::StoreResult;

/// A durable, string-keyed byte store.
///
/// Implementations MUST provide:
/// - interior mutability: all methods take `&self` so a store can be shared
///   behind an `Arc` across concurrent tasks;
/// - atomic batches: [`set_many`](Self::set_many) persists either every entry
///   or none, so related keys (cache blobs and their salt) never go out of
///   sync on disk.
///
/// Reads of absent keys return `Ok(None)`; errors are reserved for
/// infrastructure failures.
pub trait LocalStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes all `entries` as one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be persisted; in that case no
    /// entry of the batch is visible to subsequent reads.
    fn set_many(&self, entries: &[(&str, &[u8])]) -> StoreResult<()>;

    /// Removes all `keys` as one atomic batch. Absent keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal could not be persisted.
    fn remove_many(&self, keys: &[&str]) -> StoreResult<()>;

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store could not be cleared.
    fn clear(&self) -> StoreResult<()>;
}
