//! State-changing actions and per-request metadata.
//!
//! Every mutation of [`AppState`](crate::state::AppState) is expressed as an
//! [`Action`] applied through the engine, so each context observes the same
//! sequence of state snapshots regardless of which context asked for the
//! change.

use tokio::sync::oneshot;

use crate::api::{Address, AliasOptions, FeatureFlags, Plan, RemoteUser};
use crate::state::{AppState, CreateIntent, ItemRecord, Settings};
use crate::types::{ContextId, EventId, Fetched, ItemId};

/// Payload of [`Action::UserDataResolved`].
#[derive(Debug, Clone)]
pub struct ResolvedUserData {
    /// The authenticated user.
    pub user: RemoteUser,
    /// The user's addresses.
    pub addresses: Vec<Address>,
    /// Latest remote event cursor.
    pub event_id: EventId,
    /// Subscription plan, with its fetch time.
    pub plan: Fetched<Plan>,
    /// Feature flags, with their fetch time.
    pub features: Fetched<FeatureFlags>,
}

/// Payload of [`Action::ItemCreateSucceeded`].
#[derive(Debug, Clone)]
pub struct CreateSuccess {
    /// Temporary id the pending record was filed under.
    pub local_id: ItemId,
    /// Server-acknowledged record replacing it.
    pub item: ItemRecord,
    /// Companion's temporary id and acknowledged record, if one was created.
    pub companion: Option<(ItemId, ItemRecord)>,
}

/// Payload of [`Action::ItemCreateFailed`].
#[derive(Debug, Clone)]
pub struct CreateFailure {
    /// Temporary id of the failed primary record.
    pub local_id: ItemId,
    /// Temporary id of the dropped pending companion, if one was inserted.
    pub companion_id: Option<ItemId>,
    /// The original intent, pinned to the record so a retry keeps its
    /// identity.
    pub intent: CreateIntent,
    /// Human-readable failure description.
    pub error: String,
}

/// A state transition.
#[derive(Debug, Clone)]
pub enum Action {
    /// Cached state restored at boot; merged field-by-field.
    CacheRestored(Box<AppState>),
    /// Fresh or retained user data resolved during boot.
    UserDataResolved(Box<ResolvedUserData>),
    /// A consumed remote event batch.
    EventsSynced {
        /// Cursor to persist for the next sync.
        latest: EventId,
        /// Records created or updated remotely.
        upserted: Vec<ItemRecord>,
        /// Ids of records deleted remotely.
        deleted: Vec<ItemId>,
    },

    /// Optimistic insert of the intent's pending records.
    ItemCreateStarted {
        /// Intent describing the records to insert.
        intent: Box<CreateIntent>,
    },
    /// Pending records re-keyed to their server identities.
    ItemCreateSucceeded(Box<CreateSuccess>),
    /// Pending primary marked failed; pending companion removed.
    ItemCreateFailed(Box<CreateFailure>),
    /// A failed pending item discarded by the user.
    ItemDismissed {
        /// Id of the discarded item.
        id: ItemId,
    },

    /// Optimistic move of an item into the trash.
    ItemTrashStarted {
        /// Item being trashed.
        id: ItemId,
    },
    /// Server confirmed the trash move.
    ItemTrashSucceeded {
        /// Trashed item.
        id: ItemId,
    },
    /// Server rejected the trash move; the item leaves the trash again.
    ItemTrashFailed {
        /// Item put back where it was.
        id: ItemId,
    },
    /// An item removed for good.
    ItemDeleted {
        /// Deleted item.
        id: ItemId,
    },
    /// Optimistic restore of an item out of the trash.
    ItemRestoreStarted {
        /// Item being restored.
        id: ItemId,
    },
    /// Server confirmed the restore.
    ItemRestoreSucceeded {
        /// Restored item.
        id: ItemId,
    },
    /// Server rejected the restore; the item returns to the trash.
    ItemRestoreFailed {
        /// Item moved back into the trash.
        id: ItemId,
    },

    /// All trashed items removed optimistically.
    TrashEmptied {
        /// Items that were in the trash.
        ids: Vec<ItemId>,
    },
    /// Optimistic restore of a set of trashed items.
    TrashRestoreStarted {
        /// Items being restored.
        ids: Vec<ItemId>,
    },
    /// Server confirmed the bulk restore.
    TrashRestoreSucceeded {
        /// Restored items.
        ids: Vec<ItemId>,
    },
    /// Server rejected the bulk restore; the items return to the trash.
    TrashRestoreFailed {
        /// Items moved back into the trash.
        ids: Vec<ItemId>,
    },

    /// Alias-creation options fetched from the backend.
    AliasOptionsLoaded(AliasOptions),

    /// A session-lock PIN was registered.
    LockEnabled {
        /// Server-side lock session TTL, in seconds.
        ttl_secs: u64,
    },
    /// The session-lock registration was removed.
    LockDisabled,
    /// The session entered the locked state.
    Locked,
    /// The session left the locked state.
    Unlocked,

    /// Edited settings merged into state.
    SettingsEdited(Settings),
    /// The session ended; state returns to its defaults.
    SignedOut,
}

/// How a failed request should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Same request may be retried (for example with a corrected PIN).
    Retryable,
    /// The session is unusable; the caller must re-authenticate.
    Fatal,
}

/// Outcome detail delivered through a request callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    /// Whether the request may be repeated.
    pub kind: FailureKind,
    /// Human-readable failure description.
    pub message: String,
}

impl ActionFailure {
    /// A failure the caller may retry.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    /// A failure that ends the session.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    /// Whether recovery requires re-authentication.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, FailureKind::Fatal)
    }
}

/// Result reported back to the requesting context.
pub type ActionResult = Result<(), ActionFailure>;

/// One-shot completion callback for a request.
pub type Ack = oneshot::Sender<ActionResult>;

/// Routing and completion metadata attached to a request.
///
/// `receiver` scopes resulting notifications to the requesting context.
/// The callback fires exactly once; a request coalesced away drops its
/// callback unfired, which the awaiting side observes as a closed channel.
#[derive(Debug, Default)]
pub struct ActionMeta {
    /// Context the resulting notifications are scoped to.
    pub receiver: Option<ContextId>,
    callback: Option<Ack>,
}

impl ActionMeta {
    /// Metadata scoped to `context`.
    #[must_use]
    pub const fn to(context: ContextId) -> Self {
        Self {
            receiver: Some(context),
            callback: None,
        }
    }

    /// Attaches a completion callback.
    #[must_use]
    pub fn with_callback(mut self, callback: Ack) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Fires the callback with `outcome`, if one is attached.
    ///
    /// Consumes the metadata so an outcome cannot be reported twice. A
    /// dropped receiver is ignored.
    pub fn resolve(self, outcome: ActionResult) {
        if let Some(callback) = self.callback {
            let _ = callback.send(outcome);
        }
    }
}
