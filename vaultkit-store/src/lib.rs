//! Local storage primitives for vaultkit.
//!
//! This crate provides the durable building blocks the synchronization engine
//! sits on:
//!
//! - [`LocalStore`] — a string-keyed byte store with atomic batch writes,
//!   implemented in memory ([`MemoryStore`]) and on disk ([`FileStore`]).
//! - [`CacheKey`] — the 256-bit cache encryption key, derived with
//!   HKDF-SHA-256 from a persisted salt and an optional session-lock token.
//! - [`seal`] / [`open`] — XChaCha20-Poly1305 AEAD over cache blobs with
//!   per-blob domain-separation labels.
//!
//! Nothing in this crate knows about application state, sessions, or the
//! backend; it only moves and protects bytes.

mod cipher;
mod derive;
pub mod error;
mod file;
mod memory;
mod store;

pub use cipher::{open, seal, NONCE_SIZE};
pub use derive::{generate_salt, CacheKey, SALT_SIZE};
pub use error::{CipherError, StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::LocalStore;
