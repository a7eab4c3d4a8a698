//! AEAD cipher for cache blobs.
//!
//! XChaCha20-Poly1305 with a fresh random 24-byte nonce per call. The nonce
//! is prepended to the ciphertext so a sealed blob is self-contained. The
//! caller supplies a domain-separation label as associated data, which binds
//! each blob to its slot: a state blob authenticated under the state label
//! cannot be replayed as a snapshot blob.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::derive::CacheKey;
use crate::error::CipherError;

/// Size of the XChaCha20-Poly1305 nonce prefix, in bytes.
pub const NONCE_SIZE: usize = 24;

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts `plaintext` under `key`, authenticating `label`.
///
/// Returns `nonce || ciphertext || tag`.
///
/// # Errors
///
/// Returns [`CipherError::EncryptionFailed`] if the AEAD rejects the input;
/// this does not happen for valid keys and reasonable plaintext sizes.
///
/// # Panics
///
/// This function will not panic - the `expect` is for a condition that cannot
/// fail (the key length is 32 bytes by construction).
pub fn seal(key: &CacheKey, label: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key length is always 32");

    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: label,
            },
        )
        .map_err(|_| CipherError::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a blob produced by [`seal`] with the same `key` and `label`.
///
/// # Errors
///
/// Returns [`CipherError::Truncated`] if the blob is shorter than the nonce
/// prefix, and [`CipherError::DecryptionFailed`] if authentication fails
/// (wrong key, tampered payload, or label mismatch).
///
/// # Panics
///
/// This function will not panic - the `expect` is for a condition that cannot
/// fail (the key length is 32 bytes by construction).
pub fn open(key: &CacheKey, label: &[u8], blob: &[u8]) -> Result<Vec<u8>, CipherError> {
    if blob.len() < NONCE_SIZE {
        return Err(CipherError::Truncated { len: blob.len() });
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);

    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key length is always 32");
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: label,
            },
        )
        .map_err(|_| CipherError::DecryptionFailed)
}
