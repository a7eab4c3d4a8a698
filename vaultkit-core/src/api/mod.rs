//! Backend API boundary: data transfer types, error classification, and the
//! [`Backend`] trait the engine drives. The HTTP implementation lives in
//! [`http`].

mod http;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::LockToken;
use crate::types::{EventId, ItemId, ShareId, UserId};

pub use http::HttpBackend;

/// Server error code: the session lock was invalidated server-side (expired
/// or removed after too many failed attempts). Unlocking with this code is
/// fatal and forces sign-out.
pub const CODE_LOCK_INACTIVE: u64 = 2501;

/// Server error code: the supplied lock PIN did not match. Retryable.
pub const CODE_WRONG_LOCK_PIN: u64 = 2502;

/// Errors surfaced by [`Backend`] implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Transport failure, timeout, or a transient status that survived the
    /// retry budget.
    #[error("network error ({url}): {error}")]
    Network {
        /// Requested URL.
        url: String,
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Human-readable failure description.
        error: String,
    },

    /// Non-success response from the backend.
    #[error("api error (status {status}): {}", message.as_deref().unwrap_or("no message"))]
    Status {
        /// HTTP status code.
        status: u16,
        /// Application-level error code from the response body, if any.
        code: Option<u64>,
        /// Server-supplied error message, if any.
        message: Option<String>,
    },

    /// The response body could not be decoded.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// The server-supplied error message, when the backend sent one.
    #[must_use]
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            Self::Network { .. } | Self::Decode(_) => None,
        }
    }

    /// User-presentable failure detail: the server's message when available,
    /// otherwise the error's own rendering.
    #[must_use]
    pub fn detail(&self) -> String {
        self.api_message()
            .map_or_else(|| self.to_string(), str::to_owned)
    }

    /// Application-level error code, if the backend sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u64> {
        match self {
            Self::Status { code, .. } => *code,
            Self::Network { .. } | Self::Decode(_) => None,
        }
    }

    /// Whether this failure is transport-level rather than a server verdict.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// The authenticated user, as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    /// Server-side user id.
    pub id: UserId,
    /// Primary email.
    pub email: String,
    /// Display name, when set.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// An address attached to the user account; input to crypto hydration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Server-side address id.
    pub id: String,
    /// Address email.
    pub email: String,
}

/// The user's subscription plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan name, e.g. `free` or `plus`.
    pub name: String,
    /// Unix timestamp (seconds) when the trial ends, for trialing plans.
    #[serde(default)]
    pub trial_end: Option<u64>,
}

impl Plan {
    /// The default plan shape used when no plan could ever be fetched.
    #[must_use]
    pub fn free() -> Self {
        Self {
            name: "free".to_owned(),
            trial_end: None,
        }
    }
}

/// Remotely toggled feature flags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(std::collections::BTreeMap<String, bool>);

impl FeatureFlags {
    /// Whether `flag` is enabled. Unknown flags are off.
    #[must_use]
    pub fn enabled(&self, flag: &str) -> bool {
        self.0.get(flag).copied().unwrap_or(false)
    }

    /// Sets a flag (test and fake-backend helper).
    pub fn set(&mut self, flag: impl Into<String>, on: bool) {
        self.0.insert(flag.into(), on);
    }
}

/// Options for creating alias items: available suffixes and destination
/// mailboxes. Short-lived; invalidated by any creation that consumes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasOptions {
    /// Usable alias suffixes.
    pub suffixes: Vec<String>,
    /// Destination mailboxes.
    pub mailboxes: Vec<String>,
}

/// Kind of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Login credentials.
    Login,
    /// Email alias.
    Alias,
    /// Secure note.
    Note,
}

/// An item as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Server-assigned item id.
    pub item_id: String,
    /// Share the item belongs to.
    pub share_id: ShareId,
    /// Item kind.
    pub kind: ItemKind,
    /// Display name.
    pub name: String,
    /// Opaque item content.
    pub content: serde_json::Value,
    /// Whether the item sits in the trash.
    #[serde(default)]
    pub trashed: bool,
}

/// Payload for one item creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateItemCall {
    /// Target share.
    pub share_id: ShareId,
    /// Item kind.
    pub kind: ItemKind,
    /// Display name.
    pub name: String,
    /// Opaque item content.
    pub content: serde_json::Value,
    /// Client-chosen reference (the temporary id), echoed by the server for
    /// idempotent retries.
    pub client_id: String,
}

/// Reference to an item for bulk operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    /// Share the item belongs to.
    pub share_id: ShareId,
    /// Server-assigned item id.
    pub item_id: String,
}

/// One batch of server-side changes since an event cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Cursor to persist for the next partial sync.
    pub latest: EventId,
    /// Items created or updated since the cursor.
    #[serde(default)]
    pub upserted: Vec<RemoteItem>,
    /// Server ids of items deleted since the cursor.
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl EventBatch {
    /// Number of changes carried by the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upserted.len() + self.deleted.len()
    }

    /// Whether the batch carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.deleted.is_empty()
    }

    /// Server ids of deleted items as typed ids.
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<ItemId> {
        self.deleted.iter().cloned().map(ItemId::Remote).collect()
    }
}

/// The backend the engine synchronizes against.
///
/// All calls are authenticated with the session installed at construction
/// time of the implementation. Implementations MUST be safe to call from
/// concurrent tasks.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetches the authenticated user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn fetch_user(&self) -> Result<RemoteUser, ApiError>;

    /// Fetches the user's addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn fetch_addresses(&self) -> Result<Vec<Address>, ApiError>;

    /// Fetches the latest event cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn fetch_latest_event_id(&self) -> Result<EventId, ApiError>;

    /// Fetches the subscription plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn fetch_plan(&self) -> Result<Plan, ApiError>;

    /// Fetches the feature flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn fetch_features(&self) -> Result<FeatureFlags, ApiError>;

    /// Fetches alias-creation options.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn fetch_alias_options(&self) -> Result<AliasOptions, ApiError>;

    /// Fetches changes since `cursor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn sync_events(&self, cursor: &EventId) -> Result<EventBatch, ApiError>;

    /// Creates one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the creation.
    async fn create_item(&self, call: &CreateItemCall) -> Result<RemoteItem, ApiError>;

    /// Creates an item and its companion in one atomic call: either both
    /// materialize or the whole operation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the pair; neither item exists
    /// afterwards.
    async fn create_item_pair(
        &self,
        primary: &CreateItemCall,
        companion: &CreateItemCall,
    ) -> Result<(RemoteItem, RemoteItem), ApiError>;

    /// Moves an item to the trash.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the operation.
    async fn trash_item(&self, share_id: &ShareId, item_id: &str) -> Result<(), ApiError>;

    /// Restores a trashed item.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the operation.
    async fn restore_item(&self, share_id: &ShareId, item_id: &str) -> Result<(), ApiError>;

    /// Permanently deletes an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the operation.
    async fn delete_item(&self, share_id: &ShareId, item_id: &str) -> Result<(), ApiError>;

    /// Permanently deletes a set of items.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the operation.
    async fn delete_items(&self, items: &[ItemRef]) -> Result<(), ApiError>;

    /// Restores a set of trashed items.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the operation.
    async fn restore_items(&self, items: &[ItemRef]) -> Result<(), ApiError>;

    /// Registers a session lock, returning its token.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock already exists or the request fails.
    async fn create_lock(&self, pin: &SecretString, ttl_secs: u64) -> Result<LockToken, ApiError>;

    /// Deletes the registered session lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the PIN does not match or the request fails.
    async fn delete_lock(&self, pin: &SecretString) -> Result<(), ApiError>;

    /// Exchanges the PIN for the registered lock token.
    ///
    /// # Errors
    ///
    /// Returns an error carrying [`CODE_WRONG_LOCK_PIN`] on a mismatch and
    /// [`CODE_LOCK_INACTIVE`] (or HTTP 410) when the lock no longer exists.
    async fn unlock(&self, pin: &SecretString) -> Result<LockToken, ApiError>;

    /// Extends the server-side lock deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is no longer accepted.
    async fn extend_lock(&self, token: &LockToken) -> Result<(), ApiError>;

    /// Immediately invalidates the session server-side.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails; the caller decides whether to
    /// retry on a later boot.
    async fn revoke_session(&self) -> Result<(), ApiError>;
}
