//! Encrypted persistence of application state and the crypto snapshot.
//!
//! The cache is three store entries (`state`, `snapshot`, `salt`) that only
//! mean anything together. The two blobs are sealed under a key derived from
//! the salt and the current session-lock token; losing the token (or having
//! none while the blobs were written with one) makes the cache undecryptable,
//! which readers treat as a plain miss.

use std::sync::Arc;

use vaultkit_store::{generate_salt, open, seal, CacheKey, LocalStore, StoreError};

use crate::crypto::CryptoSnapshot;
use crate::error::{EngineError, EngineResult};
use crate::lock::LockToken;
use crate::state::AppState;

const KEY_STATE: &str = "state";
const KEY_SNAPSHOT: &str = "snapshot";
const KEY_SALT: &str = "salt";
/// Marker left behind when a remote lock revoke could not be confirmed.
const KEY_FORCE_LOCK: &str = "force_lock";

const AAD_STATE: &[u8] = b"vaultkit:cache:state:v1";
const AAD_SNAPSHOT: &[u8] = b"vaultkit:cache:snapshot:v1";

/// A successfully decrypted cache entry.
#[derive(Debug)]
pub struct DecryptedCache {
    /// The application state as it was last persisted.
    pub state: AppState,
    /// The crypto snapshot persisted alongside it.
    pub snapshot: CryptoSnapshot,
}

/// Seals state into, and restores it from, the local store.
pub struct CacheCodec {
    store: Arc<dyn LocalStore>,
}

impl CacheCodec {
    /// Creates a codec over `store`.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    fn key_for(salt: &[u8], token: Option<&LockToken>) -> CacheKey {
        CacheKey::derive(salt, token.map(LockToken::as_bytes))
    }

    // Reads one entry, discarding the whole store if its backing file no
    // longer decodes. A torn file would fail every read the same way on
    // every boot; dropping it costs one cold start instead.
    fn read_entry(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.store.get(key) {
            Ok(value) => Ok(value),
            Err(StoreError::Codec(err)) => {
                tracing::warn!(%err, "cache store is unreadable, discarding it");
                self.store.clear()?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Loads and decrypts the cached entry.
    ///
    /// Returns `Ok(None)` when any of the three entries is absent, when the
    /// blobs do not decrypt under the derived key (wrong or missing token),
    /// or when the decrypted state fails to decode. None of those are hard
    /// failures; boot continues as a cold start. A store whose backing file
    /// no longer decodes is discarded and treated the same way.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures of the underlying store surface as
    /// errors.
    pub fn decrypt_cache(
        &self,
        token: Option<&LockToken>,
    ) -> Result<Option<DecryptedCache>, StoreError> {
        let Some(salt) = self.read_entry(KEY_SALT)? else {
            return Ok(None);
        };
        let Some(state_blob) = self.read_entry(KEY_STATE)? else {
            return Ok(None);
        };
        let Some(snapshot_blob) = self.read_entry(KEY_SNAPSHOT)? else {
            return Ok(None);
        };

        let key = Self::key_for(&salt, token);
        let state_bytes = match open(&key, AAD_STATE, &state_blob) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(%err, "cached state does not decrypt, treating as a miss");
                return Ok(None);
            }
        };
        let snapshot_bytes = match open(&key, AAD_SNAPSHOT, &snapshot_blob) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(%err, "cached snapshot does not decrypt, treating as a miss");
                return Ok(None);
            }
        };

        match ciborium::de::from_reader::<AppState, _>(state_bytes.as_slice()) {
            Ok(state) => Ok(Some(DecryptedCache {
                state,
                snapshot: CryptoSnapshot::new(snapshot_bytes),
            })),
            Err(err) => {
                tracing::debug!(%err, "cached state does not decode, treating as a miss");
                Ok(None)
            }
        }
    }

    /// Seals `state` and `snapshot` and writes all three entries in one
    /// atomic batch, reusing the stored salt when one exists.
    ///
    /// # Errors
    ///
    /// Fails on state serialization, sealing, or store write errors.
    pub fn encrypt_cache(
        &self,
        state: &AppState,
        snapshot: &CryptoSnapshot,
        token: Option<&LockToken>,
    ) -> EngineResult<()> {
        let salt = match self.read_entry(KEY_SALT)? {
            Some(existing) => existing,
            None => generate_salt().to_vec(),
        };
        let key = Self::key_for(&salt, token);

        let mut state_bytes = Vec::new();
        ciborium::ser::into_writer(state, &mut state_bytes)
            .map_err(|err| EngineError::Serialization(err.to_string()))?;
        let state_blob = seal(&key, AAD_STATE, &state_bytes)?;
        let snapshot_blob = seal(&key, AAD_SNAPSHOT, snapshot.as_bytes())?;

        self.store.set_many(&[
            (KEY_SALT, salt.as_slice()),
            (KEY_STATE, &state_blob),
            (KEY_SNAPSHOT, &snapshot_blob),
        ])?;
        Ok(())
    }

    /// Removes the cache entries, leaving other store keys alone.
    ///
    /// # Errors
    ///
    /// Surfaces store write failures.
    pub fn purge(&self) -> Result<(), StoreError> {
        self.store.remove_many(&[KEY_STATE, KEY_SNAPSHOT, KEY_SALT])
    }

    /// Records that the session must come up locked on the next boot.
    ///
    /// # Errors
    ///
    /// Surfaces store write failures.
    pub fn set_force_lock(&self) -> Result<(), StoreError> {
        self.store.set_many(&[(KEY_FORCE_LOCK, &[1u8][..])])
    }

    /// # Errors
    ///
    /// Surfaces store write failures.
    pub fn clear_force_lock(&self) -> Result<(), StoreError> {
        self.store.remove_many(&[KEY_FORCE_LOCK])
    }

    /// Whether a forced lock is pending from an earlier unconfirmed revoke.
    ///
    /// # Errors
    ///
    /// Surfaces store read failures.
    pub fn force_lock_pending(&self) -> Result<bool, StoreError> {
        Ok(self.read_entry(KEY_FORCE_LOCK)?.is_some())
    }
}
