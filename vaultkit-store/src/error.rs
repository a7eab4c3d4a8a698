//! Error types for storage and cache-cipher primitives.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by [`LocalStore`](crate::LocalStore) implementations.
///
/// These are infrastructure failures (disk, encoding of the backing file),
/// never "key not found" — an absent key is reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem I/O failure in the backing store.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be encoded or decoded.
    #[error("store codec error: {0}")]
    Codec(String),
}

/// Errors raised by the cache cipher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// AEAD encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD authentication failed: wrong key, tampered payload, or a label
    /// mismatch.
    #[error("decryption failed: bad key or corrupt payload")]
    DecryptionFailed,

    /// Blob shorter than the nonce prefix.
    #[error("ciphertext truncated: {len} bytes is shorter than the nonce")]
    Truncated {
        /// Length of the rejected blob.
        len: usize,
    },
}
