//! Request identity and in-flight tracking.
//!
//! Requests are keyed by what they do and, for item mutations, which item
//! they touch. Single-flight keys coalesce duplicates: a second request with
//! the same key while the first is still running is dropped, and its caller
//! learns about the outcome through the shared state snapshot instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::types::ItemId;

/// Identity of an engine request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// The wakeup boot sequence.
    Boot,
    /// Registering a session-lock PIN.
    LockEnable,
    /// Removing the session-lock registration.
    LockDisable,
    /// Unlocking a locked session.
    LockUnlock,
    /// Editing settings.
    SettingsEdit,
    /// Creating the item filed under this temporary id.
    ItemCreate(ItemId),
    /// Trashing this item.
    ItemTrash(ItemId),
    /// Deleting this item for good.
    ItemDelete(ItemId),
    /// Restoring this item from the trash.
    ItemRestore(ItemId),
    /// Emptying the trash.
    TrashEmpty,
    /// Restoring everything in the trash.
    TrashRestore,
    /// Consuming the remote event feed.
    EventsSync,
}

impl RequestKey {
    /// Whether a duplicate of this request must be coalesced while one is
    /// already running.
    ///
    /// Item mutations are already serialized per item by their key carrying
    /// the item id; distinct items may mutate concurrently.
    #[must_use]
    pub const fn is_single_flight(&self) -> bool {
        matches!(
            self,
            Self::Boot
                | Self::LockEnable
                | Self::LockDisable
                | Self::LockUnlock
                | Self::SettingsEdit
        )
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "boot"),
            Self::LockEnable => write!(f, "lock::enable"),
            Self::LockDisable => write!(f, "lock::disable"),
            Self::LockUnlock => write!(f, "lock::unlock"),
            Self::SettingsEdit => write!(f, "settings::edit"),
            Self::ItemCreate(id) => write!(f, "item::create::{id}"),
            Self::ItemTrash(id) => write!(f, "item::trash::{id}"),
            Self::ItemDelete(id) => write!(f, "item::delete::{id}"),
            Self::ItemRestore(id) => write!(f, "item::restore::{id}"),
            Self::TrashEmpty => write!(f, "trash::empty"),
            Self::TrashRestore => write!(f, "trash::restore"),
            Self::EventsSync => write!(f, "events::sync"),
        }
    }
}

/// Lifecycle stage of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Still running.
    Started,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
}

/// Tracks the last known status of every request key.
///
/// Contexts read this to render per-request progress; the engine uses it to
/// enforce single-flight coalescing.
#[derive(Debug, Default)]
pub struct RequestTracker {
    inner: Mutex<HashMap<RequestKey, RequestStatus>>,
}

impl RequestTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestKey, RequestStatus>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` started.
    ///
    /// Returns `false` when the key is single-flight and already running,
    /// in which case the caller must drop the duplicate request.
    pub fn start(&self, key: &RequestKey) -> bool {
        let mut statuses = self.lock();
        if key.is_single_flight() && statuses.get(key) == Some(&RequestStatus::Started) {
            return false;
        }
        statuses.insert(key.clone(), RequestStatus::Started);
        true
    }

    /// Records the terminal status for `key`.
    pub fn finish(&self, key: &RequestKey, ok: bool) {
        let status = if ok {
            RequestStatus::Succeeded
        } else {
            RequestStatus::Failed
        };
        self.lock().insert(key.clone(), status);
    }

    /// Last known status of `key`, if it was ever started.
    #[must_use]
    pub fn status(&self, key: &RequestKey) -> Option<RequestStatus> {
        self.lock().get(key).copied()
    }

    /// Whether `key` is currently running.
    #[must_use]
    pub fn in_flight(&self, key: &RequestKey) -> bool {
        self.status(key) == Some(RequestStatus::Started)
    }

    /// Forgets all statuses. Used on sign-out.
    pub fn reset(&self) {
        self.lock().clear();
    }
}
