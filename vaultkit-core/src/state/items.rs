//! Item records and the mutation intents that produce them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{CreateItemCall, ItemKind, RemoteItem};
use crate::types::{ItemId, ShareId};

/// Lifecycle status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Usable.
    Active,
    /// In the trash, restorable until deleted for good.
    Trashed,
}

/// Complete description of a create request.
///
/// The intent owns the temporary local ids. A retry reuses the intent
/// verbatim, so the pending records keep their identity across attempts and
/// contexts never see a failed item duplicated under a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIntent {
    /// Temporary id the pending primary record is filed under.
    pub local_id: ItemId,
    /// Share the item is created in.
    pub share_id: ShareId,
    /// Kind of the primary item.
    pub kind: ItemKind,
    /// Display name.
    pub name: String,
    /// Kind-specific item content.
    pub content: Value,
    /// Companion created atomically with the primary, if any.
    pub companion: Option<CompanionIntent>,
}

/// Secondary item created atomically with the primary, in the same share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionIntent {
    /// Temporary id the pending companion record is filed under.
    pub local_id: ItemId,
    /// Kind of the companion item.
    pub kind: ItemKind,
    /// Display name.
    pub name: String,
    /// Kind-specific item content.
    pub content: Value,
}

impl CreateIntent {
    /// A new intent with a fresh local id.
    #[must_use]
    pub fn new(share_id: ShareId, kind: ItemKind, name: impl Into<String>, content: Value) -> Self {
        Self {
            local_id: ItemId::fresh_local(),
            share_id,
            kind,
            name: name.into(),
            content,
            companion: None,
        }
    }

    /// Attaches a companion item, created in the same call as the primary.
    #[must_use]
    pub fn with_companion(
        mut self,
        kind: ItemKind,
        name: impl Into<String>,
        content: Value,
    ) -> Self {
        self.companion = Some(CompanionIntent {
            local_id: ItemId::fresh_local(),
            kind,
            name: name.into(),
            content,
        });
        self
    }

    /// Pending record for the primary item.
    #[must_use]
    pub fn primary_record(&self) -> ItemRecord {
        ItemRecord::pending(
            self.local_id.clone(),
            self.share_id.clone(),
            self.kind,
            self.name.clone(),
            self.content.clone(),
        )
    }

    /// Pending record for the companion, when one is attached.
    #[must_use]
    pub fn companion_record(&self) -> Option<ItemRecord> {
        self.companion.as_ref().map(|companion| {
            ItemRecord::pending(
                companion.local_id.clone(),
                self.share_id.clone(),
                companion.kind,
                companion.name.clone(),
                companion.content.clone(),
            )
        })
    }

    /// API call for the primary item. The local id doubles as the
    /// idempotency key, stable across retries.
    #[must_use]
    pub fn primary_call(&self) -> CreateItemCall {
        CreateItemCall {
            share_id: self.share_id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            content: self.content.clone(),
            client_id: self.local_id.to_string(),
        }
    }

    /// API call for the companion item, when one is attached.
    #[must_use]
    pub fn companion_call(&self) -> Option<CreateItemCall> {
        self.companion.as_ref().map(|companion| CreateItemCall {
            share_id: self.share_id.clone(),
            kind: companion.kind,
            name: companion.name.clone(),
            content: companion.content.clone(),
            client_id: companion.local_id.to_string(),
        })
    }
}

/// Failure pinned to a pending item whose create did not go through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCreate {
    /// The original intent, kept so a retry reuses the same identity.
    pub intent: CreateIntent,
    /// Human-readable failure description.
    pub error: String,
}

/// An item as contexts render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Item identity, temporary until the server confirms the create.
    pub id: ItemId,
    /// Share the item lives in.
    pub share_id: ShareId,
    /// Item kind.
    pub kind: ItemKind,
    /// Display name.
    pub name: String,
    /// Kind-specific item content.
    pub content: Value,
    /// Lifecycle status.
    pub status: ItemStatus,
    /// Locally assumed, not yet confirmed by the server.
    pub optimistic: bool,
    /// Present only on pending items whose create failed.
    pub failed: Option<FailedCreate>,
}

impl ItemRecord {
    /// A record for a mutation the server has not acknowledged yet.
    #[must_use]
    pub fn pending(
        id: ItemId,
        share_id: ShareId,
        kind: ItemKind,
        name: String,
        content: Value,
    ) -> Self {
        Self {
            id,
            share_id,
            kind,
            name,
            content,
            status: ItemStatus::Active,
            optimistic: true,
            failed: None,
        }
    }

    /// Whether the record is in the trash.
    #[must_use]
    pub const fn is_trashed(&self) -> bool {
        matches!(self.status, ItemStatus::Trashed)
    }
}

impl From<RemoteItem> for ItemRecord {
    fn from(remote: RemoteItem) -> Self {
        Self {
            id: ItemId::remote(remote.item_id),
            share_id: remote.share_id,
            kind: remote.kind,
            name: remote.name,
            content: remote.content,
            status: if remote.trashed {
                ItemStatus::Trashed
            } else {
                ItemStatus::Active
            },
            optimistic: false,
            failed: None,
        }
    }
}
