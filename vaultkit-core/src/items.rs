//! Optimistic item mutations.
//!
//! Every operation applies its optimistic action before the first await, so
//! contexts render the transition immediately, then settles or reverts when
//! the backend answers. Failures resolve the request callback as retryable;
//! nothing here is fatal to the session.

use crate::action::{Action, ActionFailure, ActionMeta, CreateFailure, CreateSuccess};
use crate::api::{AliasOptions, ApiError, ItemKind, ItemRef};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::notification::{failure_text, Notification};
use crate::request::RequestKey;
use crate::state::{CreateIntent, ItemRecord};
use crate::types::{ItemId, ShareId};

/// Backend coordinates of a synced item.
struct RemoteParts {
    share_id: ShareId,
    remote_id: String,
    kind: ItemKind,
    name: String,
}

fn remote_refs(records: &[ItemRecord]) -> Vec<ItemRef> {
    records
        .iter()
        .filter_map(|record| {
            record.id.remote_id().map(|remote_id| ItemRef {
                share_id: record.share_id.clone(),
                item_id: remote_id.to_owned(),
            })
        })
        .collect()
}

impl Engine {
    /// Creates an item, and its companion if the intent carries one.
    ///
    /// The pending record appears in state immediately under its temporary
    /// id. On success it is re-keyed to the server id, which is returned;
    /// on failure it stays in state with the failure pinned, ready for
    /// [`Self::retry_create`] or [`Self::dismiss_failed`].
    ///
    /// # Errors
    ///
    /// Propagates the API failure after recording it in state.
    pub async fn create_item(
        &self,
        intent: CreateIntent,
        meta: ActionMeta,
    ) -> EngineResult<ItemId> {
        let key = RequestKey::ItemCreate(intent.local_id.clone());
        self.tracker.start(&key);
        let name = intent.name.clone();
        self.apply_action(&Action::ItemCreateStarted {
            intent: Box::new(intent.clone()),
        });

        match self.execute_create(&intent).await {
            Ok(success) => {
                let final_id = success.item.id.clone();
                self.apply_action(&Action::ItemCreateSucceeded(Box::new(success)));
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success(format!("\"{name}\" created"))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(final_id)
            }
            Err(err) => {
                let detail = err.detail();
                self.apply_action(&Action::ItemCreateFailed(Box::new(CreateFailure {
                    local_id: intent.local_id.clone(),
                    companion_id: intent
                        .companion
                        .as_ref()
                        .map(|companion| companion.local_id.clone()),
                    intent,
                    error: detail.clone(),
                })));
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text("Could not create item", &detail))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(ActionFailure::retryable(detail)));
                Err(err.into())
            }
        }
    }

    async fn execute_create(&self, intent: &CreateIntent) -> Result<CreateSuccess, ApiError> {
        let primary_call = intent.primary_call();
        let companion_parts = intent
            .companion
            .as_ref()
            .map(|companion| companion.local_id.clone())
            .zip(intent.companion_call());

        match companion_parts {
            Some((companion_local, companion_call)) => {
                let (primary, companion) = self
                    .backend
                    .create_item_pair(&primary_call, &companion_call)
                    .await?;
                Ok(CreateSuccess {
                    local_id: intent.local_id.clone(),
                    item: ItemRecord::from(primary),
                    companion: Some((companion_local, ItemRecord::from(companion))),
                })
            }
            None => {
                let primary = self.backend.create_item(&primary_call).await?;
                Ok(CreateSuccess {
                    local_id: intent.local_id.clone(),
                    item: ItemRecord::from(primary),
                    companion: None,
                })
            }
        }
    }

    /// Retries a failed creation with its pinned intent, so the temporary
    /// ids and the server-side idempotency reference stay identical.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownItem`] or [`EngineError::NoFailedMutation`]
    /// when there is nothing to retry; otherwise as [`Self::create_item`].
    pub async fn retry_create(&self, id: &ItemId, meta: ActionMeta) -> EngineResult<ItemId> {
        let intent = {
            let state = self.state_read();
            let record = state
                .item(id)
                .ok_or_else(|| EngineError::UnknownItem(id.clone()))?;
            record
                .failed
                .as_ref()
                .map(|failed| failed.intent.clone())
                .ok_or_else(|| EngineError::NoFailedMutation(id.clone()))?
        };
        self.create_item(intent, meta).await
    }

    /// Discards a failed pending item without retrying it.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownItem`] when the item does not exist,
    /// [`EngineError::NoFailedMutation`] when it carries no failure.
    pub fn dismiss_failed(&self, id: &ItemId) -> EngineResult<()> {
        {
            let state = self.state_read();
            let record = state
                .item(id)
                .ok_or_else(|| EngineError::UnknownItem(id.clone()))?;
            if record.failed.is_none() {
                return Err(EngineError::NoFailedMutation(id.clone()));
            }
        }
        self.apply_action(&Action::ItemDismissed { id: id.clone() });
        Ok(())
    }

    /// Moves an item to the trash, optimistically.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotSynced`] for an item that only exists locally.
    /// An API failure reverts the move before propagating.
    pub async fn trash_item(&self, id: &ItemId, meta: ActionMeta) -> EngineResult<()> {
        let key = RequestKey::ItemTrash(id.clone());
        let parts = self.remote_parts(id)?;
        self.tracker.start(&key);
        self.apply_action(&Action::ItemTrashStarted { id: id.clone() });

        match self
            .backend
            .trash_item(&parts.share_id, &parts.remote_id)
            .await
        {
            Ok(()) => {
                self.apply_action(&Action::ItemTrashSucceeded { id: id.clone() });
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success(format!("\"{}\" moved to trash", parts.name))
                        .with_group(key.to_string()),
                );
                if parts.kind == ItemKind::Alias {
                    self.emit_to(
                        meta.receiver,
                        Notification::info("The alias stops receiving email while trashed")
                            .with_group(format!("{key}::alias")),
                    );
                }
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(())
            }
            Err(err) => {
                let detail = err.detail();
                self.apply_action(&Action::ItemTrashFailed { id: id.clone() });
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text("Could not trash item", &detail))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(ActionFailure::retryable(detail)));
                Err(err.into())
            }
        }
    }

    /// Restores a trashed item, optimistically.
    ///
    /// # Errors
    ///
    /// As [`Self::trash_item`], with the move reverted back to the trash.
    pub async fn restore_item(&self, id: &ItemId, meta: ActionMeta) -> EngineResult<()> {
        let key = RequestKey::ItemRestore(id.clone());
        let parts = self.remote_parts(id)?;
        self.tracker.start(&key);
        self.apply_action(&Action::ItemRestoreStarted { id: id.clone() });

        match self
            .backend
            .restore_item(&parts.share_id, &parts.remote_id)
            .await
        {
            Ok(()) => {
                self.apply_action(&Action::ItemRestoreSucceeded { id: id.clone() });
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success(format!("\"{}\" restored", parts.name))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(())
            }
            Err(err) => {
                let detail = err.detail();
                self.apply_action(&Action::ItemRestoreFailed { id: id.clone() });
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text("Could not restore item", &detail))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(ActionFailure::retryable(detail)));
                Err(err.into())
            }
        }
    }

    /// Permanently deletes an item.
    ///
    /// The optimistic removal is not undone on failure; the next event sync
    /// re-materializes the item if the server still holds it.
    ///
    /// # Errors
    ///
    /// As [`Self::trash_item`], minus the revert.
    pub async fn delete_item(&self, id: &ItemId, meta: ActionMeta) -> EngineResult<()> {
        let key = RequestKey::ItemDelete(id.clone());
        let parts = self.remote_parts(id)?;
        self.tracker.start(&key);
        self.apply_action(&Action::ItemDeleted { id: id.clone() });

        match self
            .backend
            .delete_item(&parts.share_id, &parts.remote_id)
            .await
        {
            Ok(()) => {
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success(format!("\"{}\" permanently deleted", parts.name))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(())
            }
            Err(err) => {
                let detail = err.detail();
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text("Could not delete item", &detail))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(ActionFailure::retryable(detail)));
                Err(err.into())
            }
        }
    }

    /// Empties the trash.
    ///
    /// The trashed records are snapshotted and removed from state in one
    /// step before the network call, so an item trashed while the delete is
    /// in flight is never swept up by it.
    ///
    /// # Errors
    ///
    /// API failures propagate; the removal is not undone. The next sync
    /// restores whatever the server still holds.
    pub async fn empty_trash(&self, meta: ActionMeta) -> EngineResult<()> {
        let key = RequestKey::TrashEmpty;
        self.tracker.start(&key);

        let snapshot: Vec<ItemRecord> = {
            let mut state = self.state_write();
            let snapshot = state.trashed_items();
            let ids: Vec<ItemId> = snapshot.iter().map(|record| record.id.clone()).collect();
            state.apply(&Action::TrashEmptied { ids });
            snapshot
        };
        self.broadcast_state();

        let refs = remote_refs(&snapshot);
        let result = if refs.is_empty() {
            Ok(())
        } else {
            self.backend.delete_items(&refs).await
        };

        match result {
            Ok(()) => {
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success("Trash emptied").with_group(key.to_string()),
                );
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(())
            }
            Err(err) => {
                let detail = err.detail();
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text("Could not empty the trash", &detail))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(ActionFailure::retryable(detail)));
                Err(err.into())
            }
        }
    }

    /// Restores everything currently in the trash, optimistically.
    ///
    /// # Errors
    ///
    /// API failures revert the restored records back to the trash before
    /// propagating.
    pub async fn restore_trash(&self, meta: ActionMeta) -> EngineResult<()> {
        let key = RequestKey::TrashRestore;
        self.tracker.start(&key);

        let snapshot: Vec<ItemRecord> = {
            let mut state = self.state_write();
            let snapshot = state.trashed_items();
            let ids: Vec<ItemId> = snapshot.iter().map(|record| record.id.clone()).collect();
            state.apply(&Action::TrashRestoreStarted { ids });
            snapshot
        };
        self.broadcast_state();

        let ids: Vec<ItemId> = snapshot.iter().map(|record| record.id.clone()).collect();
        let refs = remote_refs(&snapshot);
        let result = if refs.is_empty() {
            Ok(())
        } else {
            self.backend.restore_items(&refs).await
        };

        match result {
            Ok(()) => {
                self.apply_action(&Action::TrashRestoreSucceeded { ids });
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success("Trash restored").with_group(key.to_string()),
                );
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(())
            }
            Err(err) => {
                let detail = err.detail();
                self.apply_action(&Action::TrashRestoreFailed { ids });
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text("Could not restore the trash", &detail))
                        .with_group(key.to_string()),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(ActionFailure::retryable(detail)));
                Err(err.into())
            }
        }
    }

    /// Alias-creation options, cached in state until an alias creation
    /// invalidates them.
    ///
    /// # Errors
    ///
    /// Propagates the fetch failure on a cache miss.
    pub async fn alias_options(&self) -> EngineResult<AliasOptions> {
        let cached = self.state_read().alias_options.clone();
        if let Some(options) = cached {
            return Ok(options);
        }
        let options = self.backend.fetch_alias_options().await?;
        self.apply_action(&Action::AliasOptionsLoaded(options.clone()));
        Ok(options)
    }

    fn remote_parts(&self, id: &ItemId) -> EngineResult<RemoteParts> {
        let state = self.state_read();
        let record = state
            .item(id)
            .ok_or_else(|| EngineError::UnknownItem(id.clone()))?;
        let remote_id = id
            .remote_id()
            .ok_or_else(|| EngineError::NotSynced(id.clone()))?;
        Ok(RemoteParts {
            share_id: record.share_id.clone(),
            remote_id: remote_id.to_owned(),
            kind: record.kind,
            name: record.name.clone(),
        })
    }
}
