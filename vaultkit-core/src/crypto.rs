//! Boundary to the external cryptographic engine.
//!
//! The engine that derives vault keys and opens item content is an external
//! collaborator. This module only fixes *when* it is invoked (after the cache
//! merge, before user-data refresh) and *with what* (session key material,
//! addresses, and the cached snapshot).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::Address;
use crate::types::Session;

/// Opaque, serialized snapshot of hydrated crypto state.
///
/// Produced by [`CryptoEngine::hydrate`], persisted (encrypted) alongside the
/// application state, and fed back into the next hydration so a warm boot
/// skips expensive key re-derivation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CryptoSnapshot(Vec<u8>);

impl CryptoSnapshot {
    /// Wraps serialized snapshot bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw snapshot bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the snapshot carries no state (cold boot).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for CryptoSnapshot {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Failure to hydrate the crypto engine.
///
/// Always treated as fatal for the boot that observed it: the cache the
/// snapshot came from is untrustworthy and is flagged for purge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("crypto hydration failed: {0}")]
pub struct CryptoError(String);

impl CryptoError {
    /// Creates a hydration error with a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The external cryptographic engine.
///
/// Implementations MUST be safe to call from concurrent tasks and MUST NOT
/// retain references to the session key material beyond the call.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Hydrates the engine from the user's key material, the known
    /// addresses, and the previous snapshot (absent on cold boot).
    ///
    /// Returns the refreshed snapshot to persist in the encrypted cache.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if key material and snapshot cannot be
    /// reconciled into a working state.
    async fn hydrate(
        &self,
        session: &Session,
        addresses: &[Address],
        snapshot: Option<&CryptoSnapshot>,
    ) -> Result<CryptoSnapshot, CryptoError>;

    /// Drops all hydrated key material. Called during sign-out teardown.
    async fn clear(&self);
}
