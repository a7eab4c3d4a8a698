//! The engine owns the authoritative state and serializes every mutation
//! through it.
//!
//! Contexts never mutate state directly. They send wakeups and operation
//! requests; the engine applies actions, persists the cache, and pushes
//! state copies back over the bus.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use vaultkit_store::LocalStore;

use crate::action::{Action, ActionMeta};
use crate::api::Backend;
use crate::boot::BootStatus;
use crate::bus::{BusMessage, InProcBus};
use crate::cache::CacheCodec;
use crate::config::EngineConfig;
use crate::crypto::{CryptoEngine, CryptoSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::lock::SessionLockManager;
use crate::notification::Notification;
use crate::request::{RequestKey, RequestStatus, RequestTracker};
use crate::state::{AppState, ItemRecord, Settings};
use crate::types::{ContextId, Session};

/// How often the intake loop checks whether the server-side lock session
/// needs extending.
const LOCK_HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// The background state-synchronization engine.
///
/// One instance serves every context of the running client. All methods
/// take `&self`; the engine is shared as an [`Arc`].
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) crypto: Arc<dyn CryptoEngine>,
    pub(crate) cache: CacheCodec,
    pub(crate) lock: SessionLockManager,
    pub(crate) tracker: RequestTracker,
    pub(crate) status_tx: watch::Sender<BootStatus>,
    bus: InProcBus,
    state: RwLock<AppState>,
    session: RwLock<Option<Arc<Session>>>,
    snapshot: Mutex<CryptoSnapshot>,
    woken: Mutex<BTreeSet<ContextId>>,
    last_boot_error: Mutex<Option<String>>,
}

impl Engine {
    /// Builds an engine over the given store, backend, and crypto engine.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn Backend>,
        crypto: Arc<dyn CryptoEngine>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(BootStatus::Idle);
        Arc::new(Self {
            cache: CacheCodec::new(Arc::clone(&store)),
            lock: SessionLockManager::new(Arc::clone(&backend)),
            tracker: RequestTracker::new(),
            status_tx,
            bus: InProcBus::new(config.bus_capacity),
            state: RwLock::new(AppState::default()),
            session: RwLock::new(None),
            snapshot: Mutex::new(CryptoSnapshot::default()),
            woken: Mutex::new(BTreeSet::new()),
            last_boot_error: Mutex::new(None),
            config,
            store,
            backend,
            crypto,
        })
    }

    /// Installs the authenticated session the engine operates for.
    pub fn set_session(&self, session: Session) {
        let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(session));
    }

    /// Whether a session is installed.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.current_session().is_some()
    }

    pub(crate) fn current_session(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn state_read(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state_write(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current state.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state_read().clone()
    }

    /// The current boot status.
    #[must_use]
    pub fn status(&self) -> BootStatus {
        *self.status_tx.borrow()
    }

    /// Subscribes to boot status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<BootStatus> {
        self.status_tx.subscribe()
    }

    /// The in-process message bus contexts attach to.
    #[must_use]
    pub fn bus(&self) -> &InProcBus {
        &self.bus
    }

    /// Tracker status of a request key, if one was ever started.
    #[must_use]
    pub fn request_status(&self, key: &RequestKey) -> Option<RequestStatus> {
        self.tracker.status(key)
    }

    /// Contexts that completed a wakeup since the last boot.
    #[must_use]
    pub fn woken_contexts(&self) -> BTreeSet<ContextId> {
        self.woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_snapshot(&self, snapshot: CryptoSnapshot) {
        let mut slot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = snapshot;
    }

    fn current_snapshot(&self) -> CryptoSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies an action to the state and pushes the result to every
    /// subscribed context.
    pub(crate) fn apply_action(&self, action: &Action) {
        self.state_write().apply(action);
        self.broadcast_state();
    }

    pub(crate) fn broadcast_state(&self) {
        let state = Arc::new(self.state());
        self.bus.broadcast(BusMessage::StateSync { state });
    }

    /// Publishes a notification, targeted when a receiver was named.
    pub(crate) fn emit_to(&self, receiver: Option<ContextId>, notification: Notification) {
        match receiver {
            Some(context) => self.bus.send_to(
                context,
                BusMessage::Notification(notification.with_target(context)),
            ),
            None => self.bus.broadcast(BusMessage::Notification(notification)),
        }
    }

    /// Seals state and crypto snapshot into the cache under the current
    /// lock-token key.
    ///
    /// # Errors
    ///
    /// Surfaces serialization and store failures.
    pub fn persist_cache(&self) -> EngineResult<()> {
        let state = self.state();
        let snapshot = self.current_snapshot();
        let token = self.lock.token();
        self.cache.encrypt_cache(&state, &snapshot, token.as_ref())
    }

    pub(crate) fn persist_cache_best_effort(&self) {
        if let Err(err) = self.persist_cache() {
            tracing::warn!(%err, "cache persist failed, continuing on live state");
        }
    }

    /// Handles one context wakeup.
    ///
    /// The first wakeup after process start (or after a failed attempt)
    /// runs the boot sequence; concurrent and later wakeups reuse its
    /// outcome. Every successful wakeup pushes the current state and an
    /// acknowledgement to the waking context.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoSession`] without a session. A boot failure
    /// propagates to every wakeup waiting on that attempt.
    pub async fn wakeup(&self, context: ContextId) -> EngineResult<()> {
        if !self.has_session() {
            return Err(EngineError::NoSession);
        }

        // Subscribe before racing for leadership so a fast leader cannot
        // slip its Ready past us.
        let mut status_rx = self.status_tx.subscribe();
        let leader = self.status_tx.send_if_modified(|status| match *status {
            BootStatus::Idle => {
                *status = BootStatus::Booting;
                true
            }
            BootStatus::Error => {
                *status = BootStatus::Resuming;
                true
            }
            BootStatus::Booting | BootStatus::Resuming | BootStatus::Ready => false,
        });

        if leader {
            match self.boot().await {
                Ok(report) => {
                    self.set_last_boot_error(None);
                    tracing::debug!(cold = report.cold, locked = report.locked, "boot complete");
                    self.status_tx.send_replace(BootStatus::Ready);
                }
                Err(err) => {
                    tracing::warn!(%err, "boot failed");
                    if err.must_purge_cache() {
                        if let Err(purge_err) = self.cache.purge() {
                            tracing::warn!(%purge_err, "cache purge after hydration failure failed");
                        }
                    }
                    self.set_last_boot_error(Some(err.to_string()));
                    self.status_tx.send_replace(BootStatus::Error);
                    return Err(err.into());
                }
            }
        } else {
            // The sender lives inside `self`; a closed channel is only
            // reachable mid-teardown and reads as a failed attempt.
            let status = match status_rx
                .wait_for(|status| matches!(status, BootStatus::Ready | BootStatus::Error))
                .await
            {
                Ok(status) => *status,
                Err(_) => BootStatus::Error,
            };
            if status == BootStatus::Error {
                let message = self
                    .last_boot_error()
                    .unwrap_or_else(|| "boot failed".to_owned());
                return Err(EngineError::BootFailed(message));
            }
        }

        self.push_wakeup_state(context);
        Ok(())
    }

    fn set_last_boot_error(&self, message: Option<String>) {
        let mut slot = self
            .last_boot_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = message;
    }

    fn last_boot_error(&self) -> Option<String> {
        self.last_boot_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes the current state and the wakeup acknowledgement to one
    /// context.
    fn push_wakeup_state(&self, context: ContextId) {
        let state = Arc::new(self.state());
        self.bus.send_to(context, BusMessage::StateSync { state });
        self.bus
            .send_to(context, BusMessage::WakeupSuccess { context });
        self.woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context);
        tracing::debug!(%context, "wakeup complete");
    }

    /// Drives the engine from the bus until the bus closes.
    ///
    /// Each wakeup envelope is handled on its own task so a slow boot never
    /// blocks the intake loop. A periodic tick runs [`Self::check_lock`] so
    /// a registered lock session stays extended while the engine is up.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        let mut heartbeat = tokio::time::interval(LOCK_HEARTBEAT_PERIOD);
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(envelope) => {
                        if let BusMessage::Wakeup { context } = envelope.message {
                            let engine = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(err) = engine.wakeup(context).await {
                                    tracing::warn!(%err, %context, "wakeup failed");
                                }
                            });
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "engine bus intake lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    if let Err(err) = self.check_lock().await {
                        tracing::warn!(%err, "lock heartbeat failed");
                    }
                }
            }
        }
    }

    /// Merges edited settings into state and persists them.
    ///
    /// A coalesced duplicate returns without doing anything.
    pub fn edit_settings(&self, settings: Settings, meta: ActionMeta) {
        let key = RequestKey::SettingsEdit;
        if !self.tracker.start(&key) {
            return;
        }
        self.apply_action(&Action::SettingsEdited(settings));
        self.persist_cache_best_effort();
        self.emit_to(
            meta.receiver,
            Notification::success("Settings saved").with_group("settings"),
        );
        self.tracker.finish(&key, true);
        meta.resolve(Ok(()));
    }

    /// Runs one partial event sync from the stored cursor, returning the
    /// number of changes applied.
    ///
    /// Without a cursor only the latest cursor is fetched and stored,
    /// claiming zero changes; the next boot syncs from there.
    ///
    /// # Errors
    ///
    /// Propagates API failures; state is untouched on failure.
    pub async fn sync_events(&self) -> EngineResult<usize> {
        let key = RequestKey::EventsSync;
        self.tracker.start(&key);
        let result = self.sync_events_inner().await;
        self.tracker.finish(&key, result.is_ok());
        result
    }

    async fn sync_events_inner(&self) -> EngineResult<usize> {
        let cursor = self.state_read().event_id.clone();
        let Some(cursor) = cursor else {
            let latest = self.backend.fetch_latest_event_id().await?;
            self.apply_action(&Action::EventsSynced {
                latest,
                upserted: Vec::new(),
                deleted: Vec::new(),
            });
            return Ok(0);
        };

        let batch = self.backend.sync_events(&cursor).await?;
        let changes = batch.len();
        let deleted = batch.deleted_ids();
        let upserted: Vec<ItemRecord> = batch.upserted.into_iter().map(ItemRecord::from).collect();
        self.apply_action(&Action::EventsSynced {
            latest: batch.latest,
            upserted,
            deleted,
        });
        self.persist_cache_best_effort();
        Ok(changes)
    }

    /// Tears the engine down to its pre-authentication shape.
    ///
    /// Local teardown is unconditional: cache, token, snapshot, and session
    /// all go. The server session is left to the caller.
    pub async fn sign_out(&self, notify: bool) {
        self.status_tx.send_replace(BootStatus::Idle);
        self.tracker.reset();
        if let Err(err) = self.store.clear() {
            tracing::warn!(%err, "could not clear the local store on sign-out");
        }
        self.lock.set_token(None);
        self.set_snapshot(CryptoSnapshot::default());
        {
            let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
            *slot = None;
        }
        self.crypto.clear().await;
        self.apply_action(&Action::SignedOut);
        self.woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if notify {
            self.emit_to(None, Notification::warning("Signed out"));
        }
    }
}
