//! Shared application state and the reducer advancing it.
//!
//! State is only ever mutated by applying an [`Action`]; no component writes
//! fields directly. Each applied action bumps `version`, so contexts can
//! discard snapshots that arrive out of order.

mod items;
mod merge;

pub use items::{CompanionIntent, CreateIntent, FailedCreate, ItemRecord, ItemStatus};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, CreateSuccess};
use crate::api::{Address, AliasOptions, FeatureFlags, ItemKind, Plan, RemoteUser};
use crate::lock::LockState;
use crate::types::{EventId, Fetched, ItemId};

/// Key-value user settings, synchronized across contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    entries: BTreeMap<String, Value>,
}

impl Settings {
    /// Sets one entry.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Reads one entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Whether no entry has ever been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrites the entries present in `other`, leaving the rest alone.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }
}

/// The state every context renders from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Monotonic counter, bumped on every applied action.
    pub version: u64,
    /// The authenticated user, once boot resolved one.
    pub user: Option<RemoteUser>,
    /// The user's addresses.
    pub addresses: Vec<Address>,
    /// Cursor into the remote event stream.
    pub event_id: Option<EventId>,
    /// Subscription plan, with its fetch time.
    pub plan: Option<Fetched<Plan>>,
    /// Feature flags, with their fetch time.
    pub features: Option<Fetched<FeatureFlags>>,
    /// Key-value user settings.
    pub settings: Settings,
    /// Session-lock state.
    pub lock: LockState,
    /// Every known item, keyed by id. Ordered so renders are stable.
    pub items: BTreeMap<ItemId, ItemRecord>,
    /// Alias-creation options, once fetched.
    pub alias_options: Option<AliasOptions>,
}

impl AppState {
    /// The record filed under `id`.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<&ItemRecord> {
        self.items.get(id)
    }

    /// Clones the records currently in the trash.
    #[must_use]
    pub fn trashed_items(&self) -> Vec<ItemRecord> {
        self.items
            .values()
            .filter(|record| record.is_trashed())
            .cloned()
            .collect()
    }

    /// Advances the state by one action.
    pub fn apply(&mut self, action: &Action) {
        match action {
            Action::CacheRestored(cached) => self.merge_boot((**cached).clone()),
            Action::UserDataResolved(data) => {
                self.user = Some(data.user.clone());
                self.addresses = data.addresses.clone();
                self.event_id = Some(data.event_id.clone());
                self.plan = Some(data.plan.clone());
                self.features = Some(data.features.clone());
            }
            Action::EventsSynced {
                latest,
                upserted,
                deleted,
            } => {
                for record in upserted {
                    self.items.insert(record.id.clone(), record.clone());
                }
                for id in deleted {
                    self.items.remove(id);
                }
                self.event_id = Some(latest.clone());
            }
            Action::ItemCreateStarted { intent } => {
                let primary = intent.primary_record();
                self.items.insert(primary.id.clone(), primary);
                if let Some(companion) = intent.companion_record() {
                    self.items.insert(companion.id.clone(), companion);
                }
            }
            Action::ItemCreateSucceeded(success) => self.settle_create(success),
            Action::ItemCreateFailed(failure) => {
                if let Some(companion_id) = &failure.companion_id {
                    self.items.remove(companion_id);
                }
                if let Some(record) = self.items.get_mut(&failure.local_id) {
                    record.failed = Some(FailedCreate {
                        intent: failure.intent.clone(),
                        error: failure.error.clone(),
                    });
                }
            }
            Action::ItemDismissed { id } | Action::ItemDeleted { id } => {
                self.items.remove(id);
            }
            Action::ItemTrashStarted { id } => self.move_item(id, ItemStatus::Trashed, true),
            Action::ItemTrashSucceeded { id } | Action::ItemRestoreSucceeded { id } => {
                self.settle_item(id);
            }
            Action::ItemTrashFailed { id } => self.move_item(id, ItemStatus::Active, false),
            Action::ItemRestoreStarted { id } => self.move_item(id, ItemStatus::Active, true),
            Action::ItemRestoreFailed { id } => self.move_item(id, ItemStatus::Trashed, false),
            Action::TrashEmptied { ids } => {
                for id in ids {
                    self.items.remove(id);
                }
            }
            Action::TrashRestoreStarted { ids } => {
                for id in ids {
                    self.move_item(id, ItemStatus::Active, true);
                }
            }
            Action::TrashRestoreSucceeded { ids } => {
                for id in ids {
                    self.settle_item(id);
                }
            }
            Action::TrashRestoreFailed { ids } => {
                for id in ids {
                    self.move_item(id, ItemStatus::Trashed, false);
                }
            }
            Action::AliasOptionsLoaded(options) => self.alias_options = Some(options.clone()),
            Action::LockEnabled { ttl_secs } => {
                self.lock = LockState::Registered {
                    ttl_secs: *ttl_secs,
                };
            }
            Action::LockDisabled => self.lock = LockState::None,
            Action::Locked => {
                if let LockState::Registered { ttl_secs } = self.lock {
                    self.lock = LockState::Locked { ttl_secs };
                }
            }
            Action::Unlocked => {
                if let LockState::Locked { ttl_secs } = self.lock {
                    self.lock = LockState::Registered { ttl_secs };
                }
            }
            Action::SettingsEdited(settings) => self.settings.merge(settings),
            Action::SignedOut => {
                let version = self.version;
                *self = Self::default();
                self.version = version;
            }
        }
        self.version += 1;
    }

    fn settle_create(&mut self, success: &CreateSuccess) {
        self.items.remove(&success.local_id);
        self.items
            .insert(success.item.id.clone(), success.item.clone());
        let mut alias_created = success.item.kind == ItemKind::Alias;
        if let Some((local_id, record)) = &success.companion {
            self.items.remove(local_id);
            alias_created |= record.kind == ItemKind::Alias;
            self.items.insert(record.id.clone(), record.clone());
        }
        if alias_created {
            // The server may hand out new suffixes; force a refetch.
            self.alias_options = None;
        }
    }

    fn move_item(&mut self, id: &ItemId, status: ItemStatus, optimistic: bool) {
        if let Some(record) = self.items.get_mut(id) {
            record.status = status;
            record.optimistic = optimistic;
        }
    }

    fn settle_item(&mut self, id: &ItemId) {
        if let Some(record) = self.items.get_mut(id) {
            record.optimistic = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::action::{CreateFailure, CreateSuccess};
    use crate::api::RemoteItem;
    use crate::types::ShareId;

    fn alias_intent() -> CreateIntent {
        CreateIntent::new(
            ShareId::new("share-1"),
            ItemKind::Login,
            "Example login",
            json!({"username": "a"}),
        )
        .with_companion(ItemKind::Alias, "forward@alias.dev", json!({}))
    }

    fn remote(id: &str, kind: ItemKind) -> ItemRecord {
        ItemRecord::from(RemoteItem {
            item_id: id.to_owned(),
            share_id: ShareId::new("share-1"),
            kind,
            name: "Example login".to_owned(),
            content: json!({}),
            trashed: false,
        })
    }

    #[test]
    fn test_create_lifecycle_rekeys_pending_records() {
        let intent = alias_intent();
        let companion_local = intent.companion.as_ref().expect("companion").local_id.clone();

        let mut state = AppState {
            alias_options: Some(AliasOptions {
                suffixes: vec![".dev".to_owned()],
                mailboxes: vec!["inbox".to_owned()],
            }),
            ..AppState::default()
        };
        state.apply(&Action::ItemCreateStarted {
            intent: Box::new(intent.clone()),
        });
        assert!(state.item(&intent.local_id).is_some_and(|r| r.optimistic));
        assert!(state.item(&companion_local).is_some());

        state.apply(&Action::ItemCreateSucceeded(Box::new(CreateSuccess {
            local_id: intent.local_id.clone(),
            item: remote("itm-1", ItemKind::Login),
            companion: Some((companion_local.clone(), remote("itm-2", ItemKind::Alias))),
        })));

        assert!(state.item(&intent.local_id).is_none());
        assert!(state.item(&companion_local).is_none());
        assert!(state.item(&ItemId::remote("itm-1")).is_some_and(|r| !r.optimistic));
        assert!(state.item(&ItemId::remote("itm-2")).is_some());
        // An alias materialized, so the cached options are no longer valid.
        assert!(state.alias_options.is_none());
    }

    #[test]
    fn test_create_failure_marks_primary_and_drops_companion() {
        let intent = alias_intent();
        let companion_local = intent.companion.as_ref().expect("companion").local_id.clone();

        let mut state = AppState::default();
        state.apply(&Action::ItemCreateStarted {
            intent: Box::new(intent.clone()),
        });
        state.apply(&Action::ItemCreateFailed(Box::new(CreateFailure {
            local_id: intent.local_id.clone(),
            companion_id: Some(companion_local.clone()),
            intent: intent.clone(),
            error: "offline".to_owned(),
        })));

        assert!(state.item(&companion_local).is_none());
        let primary = state.item(&intent.local_id).expect("primary stays");
        let failed = primary.failed.as_ref().expect("failure pinned");
        // A retry reuses the pinned intent, keeping the same local ids.
        assert_eq!(failed.intent.local_id, intent.local_id);
        assert_eq!(failed.error, "offline");
    }

    #[test]
    fn test_trash_failure_reverts_the_move() {
        let mut state = AppState::default();
        let record = remote("itm-1", ItemKind::Note);
        let id = record.id.clone();
        state.items.insert(id.clone(), record);

        state.apply(&Action::ItemTrashStarted { id: id.clone() });
        assert!(state.item(&id).is_some_and(ItemRecord::is_trashed));

        state.apply(&Action::ItemTrashFailed { id: id.clone() });
        let reverted = state.item(&id).expect("still present");
        assert!(!reverted.is_trashed());
        assert!(!reverted.optimistic);
    }

    #[test]
    fn test_events_synced_upserts_deletes_and_advances_cursor() {
        let mut state = AppState::default();
        let stale = remote("itm-old", ItemKind::Note);
        state.items.insert(stale.id.clone(), stale);

        state.apply(&Action::EventsSynced {
            latest: EventId::new("event-5"),
            upserted: vec![remote("itm-new", ItemKind::Login)],
            deleted: vec![ItemId::remote("itm-old")],
        });

        assert!(state.item(&ItemId::remote("itm-old")).is_none());
        assert!(state.item(&ItemId::remote("itm-new")).is_some());
        assert_eq!(state.event_id, Some(EventId::new("event-5")));
    }

    #[test]
    fn test_lock_transitions_preserve_ttl() {
        let mut state = AppState::default();
        state.apply(&Action::LockEnabled { ttl_secs: 600 });
        state.apply(&Action::Locked);
        assert_eq!(state.lock, LockState::Locked { ttl_secs: 600 });

        state.apply(&Action::Unlocked);
        assert_eq!(state.lock, LockState::Registered { ttl_secs: 600 });
    }

    #[test]
    fn test_locked_without_registration_is_a_no_op() {
        let mut state = AppState::default();
        state.apply(&Action::Locked);
        assert_eq!(state.lock, LockState::None);
    }

    #[test]
    fn test_settings_edit_overwrites_only_given_keys() {
        let mut state = AppState::default();
        state.settings.set("theme", json!("dark"));
        state.settings.set("autofill", json!(true));

        let mut edit = Settings::default();
        edit.set("theme", json!("light"));
        state.apply(&Action::SettingsEdited(edit));

        assert_eq!(state.settings.get("theme"), Some(&json!("light")));
        assert_eq!(state.settings.get("autofill"), Some(&json!(true)));
    }

    #[test]
    fn test_signed_out_clears_fields_but_version_stays_monotonic() {
        let mut state = AppState::default();
        state.apply(&Action::LockEnabled { ttl_secs: 60 });
        state.apply(&Action::SettingsEdited(Settings::default()));
        let before = state.version;

        state.apply(&Action::SignedOut);
        assert_eq!(state.lock, LockState::None);
        assert!(state.user.is_none());
        assert!(state.version > before);
    }

    #[test]
    fn test_every_action_bumps_the_version() {
        let mut state = AppState::default();
        state.apply(&Action::AliasOptionsLoaded(AliasOptions {
            suffixes: vec![],
            mailboxes: vec![],
        }));
        assert_eq!(state.version, 1);
        state.apply(&Action::LockDisabled);
        assert_eq!(state.version, 2);
    }
}
