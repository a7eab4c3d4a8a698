//! Errors surfaced by the engine's public operations.

use thiserror::Error;
use vaultkit_store::{CipherError, StoreError};

use crate::api::ApiError;
use crate::boot::BootError;
use crate::lock::LockError;
use crate::types::ItemId;

/// Convenience alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Anything that can go wrong in an engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Local store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Sealing or opening a cache blob failed structurally.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// Remote call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Session-lock operation failed.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// This wakeup led the boot and the boot failed.
    #[error(transparent)]
    Boot(#[from] BootError),

    /// A concurrent boot this wakeup piggybacked on failed.
    #[error("boot failed: {0}")]
    BootFailed(String),

    /// State could not be encoded for caching.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The operation needs an authenticated session and none is installed.
    #[error("no active session")]
    NoSession,

    /// The referenced item does not exist in state.
    #[error("unknown item {0}")]
    UnknownItem(ItemId),

    /// The item only exists locally; the server cannot act on it yet.
    #[error("item {0} has not synced yet")]
    NotSynced(ItemId),

    /// Retry or dismiss was asked for an item with no pinned failure.
    #[error("item {0} has no failed mutation to retry")]
    NoFailedMutation(ItemId),
}
