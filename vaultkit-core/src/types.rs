//! Core identifier and value types shared across the engine.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one execution context: the background process or a
/// foreground view. Contexts share logical state via the bus and are
/// addressed individually when a response must only be visible where it was
/// requested.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Creates a context id from an existing UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random context id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the share (vault) an item belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShareId(String);

impl ShareId {
    /// Creates a share id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cursor into the server-side event stream, used for partial
/// synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Creates an event cursor.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw cursor string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an item across its optimistic lifecycle.
///
/// An item created locally starts with a `Local` id and is re-keyed to the
/// server-assigned `Remote` id once the creation is confirmed. A failed
/// creation keeps its `Local` id so a retry reuses the same identity and the
/// item list never shows two entries for one logical creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemId {
    /// Temporary id assigned at mutation-intent time.
    Local(Uuid),
    /// Server-assigned id.
    Remote(String),
}

impl ItemId {
    /// Generates a fresh temporary id.
    #[must_use]
    pub fn fresh_local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    /// Creates a server-assigned id.
    pub fn remote(id: impl Into<String>) -> Self {
        Self::Remote(id.into())
    }

    /// Whether this id is still a temporary one.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The server-assigned id, if the item has been confirmed.
    #[must_use]
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::Local(_) => None,
            Self::Remote(id) => Some(id),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(uuid) => write!(f, "local:{uuid}"),
            Self::Remote(id) => f.write_str(id),
        }
    }
}

/// An authenticated user session: identity plus the key material the crypto
/// engine hydrates from. Installed once after login and torn down on
/// sign-out.
pub struct Session {
    user_id: UserId,
    key_material: SecretSlice<u8>,
}

impl Session {
    /// Creates a session from the user's id and raw key material.
    #[must_use]
    pub fn new(user_id: UserId, key_material: Vec<u8>) -> Self {
        Self {
            user_id,
            key_material: SecretSlice::from(key_material),
        }
    }

    /// The authenticated user's id.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The user's key material. Handed to the crypto engine during
    /// hydration; never logged or persisted.
    #[must_use]
    pub fn key_material(&self) -> &[u8] {
        self.key_material.expose_secret()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("key_material", &"[REDACTED]")
            .finish()
    }
}

/// A value paired with the time it was fetched, so staleness decisions can be
/// made with an explicit clock instead of one hidden in the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fetched<T> {
    /// The fetched value.
    pub value: T,
    /// Unix timestamp (seconds) of the fetch.
    pub fetched_at: u64,
}

impl<T> Fetched<T> {
    /// Wraps `value` as fetched at `now`.
    pub const fn new(value: T, now: u64) -> Self {
        Self {
            value,
            fetched_at: now,
        }
    }

    /// Seconds elapsed since the fetch. Saturates at zero for clocks that
    /// moved backwards.
    #[must_use]
    pub const fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.fetched_at)
    }

    /// Whether the value was fetched less than `window_secs` ago.
    #[must_use]
    pub const fn fresh_within(&self, window_secs: u64, now: u64) -> bool {
        self.age_secs(now) < window_secs
    }
}

/// Current unix timestamp in seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
