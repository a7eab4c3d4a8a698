//! Cache-key derivation.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the persisted key-derivation salt, in bytes.
pub const SALT_SIZE: usize = 32;

/// Input key material used when no session-lock token is registered.
const UNLOCKED_IKM: &[u8] = b"vaultkit:cache:unlocked";

/// HKDF info string binding derived keys to the cache domain.
const DERIVE_INFO: &[u8] = b"vaultkit:cache-key:v1";

/// Cache encryption key (256-bit).
///
/// Derived from the persisted salt and, when a session lock is registered,
/// the lock token. The key is never persisted; changing the lock token yields
/// a different key, which deliberately makes previously written cache entries
/// undecryptable until they are re-encrypted.
///
/// # Security
///
/// - The key is zeroized on drop.
/// - The key is never logged or serialized in plaintext.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Creates a cache key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the cache key for `salt` and an optional session-lock token.
    ///
    /// Without a token this yields the unlocked key. HKDF-SHA-256 with the
    /// persisted salt as HKDF salt and the token bytes (or a fixed
    /// unlocked-mode label) as input key material.
    ///
    /// # Panics
    ///
    /// This function will not panic - the `expect` is for a condition that
    /// cannot fail (32 bytes is always a valid HKDF-SHA-256 output length).
    #[must_use]
    pub fn derive(salt: &[u8], token: Option<&[u8]>) -> Self {
        let ikm = token.unwrap_or(UNLOCKED_IKM);
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = [0u8; 32];
        hk.expand(DERIVE_INFO, &mut okm)
            .expect("32 bytes is a valid HKDF output length");
        Self(okm)
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Generates a fresh random key-derivation salt.
#[must_use]
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}
