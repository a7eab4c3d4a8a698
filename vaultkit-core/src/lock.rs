//! Session-lock registration, unlock, and the immediate local lock.
//!
//! The lock token is the second input to the cache key. It lives only in
//! memory here; it is never serialized, and every other component receives
//! it as a borrowed capability rather than shared mutable state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use secrecy::SecretString;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionFailure, ActionMeta};
use crate::api::{ApiError, Backend, CODE_LOCK_INACTIVE, CODE_WRONG_LOCK_PIN};
use crate::boot::BootStatus;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::notification::{failure_text, Notification};
use crate::request::RequestKey;
use crate::types::now_unix;

/// Notification replacement group for lock-related messages.
const SESSION_LOCK_GROUP: &str = "session-lock";

/// Opaque server-issued credential unlocking the session-lock session.
///
/// # Security
///
/// Held in memory only and zeroized on drop. `Debug` renders a redaction
/// so the token cannot leak through logs.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct LockToken(String);

impl LockToken {
    /// Wraps a server-issued token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token as presented back to the server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The token bytes fed into cache-key derivation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LockToken").field(&"[REDACTED]").finish()
    }
}

/// Lock registration state, as rendered by contexts.
///
/// The token itself is deliberately not part of this; only the background
/// engine holds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// No PIN registered.
    #[default]
    None,
    /// PIN registered and the session is currently usable.
    Registered {
        /// Server-side lock session TTL, in seconds.
        ttl_secs: u64,
    },
    /// Session locked; credentials are inaccessible until unlock.
    Locked {
        /// Server-side lock session TTL, in seconds.
        ttl_secs: u64,
    },
}

/// Failures of session-lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// The server no longer holds a lock session (expired or too many
    /// attempts). Only a full re-authentication recovers from this.
    #[error("session lock is no longer active")]
    InactiveSession,

    /// The server rejected the credential; the user may try again.
    #[error("{0}")]
    WrongCredential(String),

    /// Transport-level failure before the server could judge the request.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl LockError {
    /// Whether recovery requires a forced sign-out.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InactiveSession)
    }
}

/// Maps a raw API failure onto the retryable/fatal split callers act on.
fn classify(err: ApiError) -> LockError {
    match err.code() {
        Some(CODE_LOCK_INACTIVE) => return LockError::InactiveSession,
        Some(CODE_WRONG_LOCK_PIN) => {
            return LockError::WrongCredential(
                err.api_message().unwrap_or("wrong PIN").to_owned(),
            );
        }
        _ => {}
    }
    match err {
        ApiError::Status { status: 410, .. } => LockError::InactiveSession,
        ApiError::Status { .. } => LockError::WrongCredential(err.detail()),
        other => LockError::Api(other),
    }
}

#[derive(Debug, Default)]
struct LockSlot {
    token: Option<LockToken>,
    /// Unix timestamp of the last confirmed server-side extension.
    last_extended: u64,
}

/// Owns the lock token and talks to the backend's lock endpoints.
pub struct SessionLockManager {
    backend: Arc<dyn Backend>,
    slot: Mutex<LockSlot>,
}

impl SessionLockManager {
    /// Creates a manager with no token installed.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            slot: Mutex::new(LockSlot::default()),
        }
    }

    fn slot(&self) -> MutexGuard<'_, LockSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clones the current token, if one is installed.
    #[must_use]
    pub fn token(&self) -> Option<LockToken> {
        self.slot().token.clone()
    }

    /// Installs or clears the token without touching the heartbeat clock.
    pub fn set_token(&self, token: Option<LockToken>) {
        self.slot().token = token;
    }

    fn install(&self, token: LockToken, now: u64) {
        let mut slot = self.slot();
        slot.token = Some(token);
        slot.last_extended = now;
    }

    /// Registers a PIN, replacing any existing registration.
    ///
    /// When a lock is already registered the remote registration is deleted
    /// first, so a failed create cannot leave two server-side locks behind.
    ///
    /// # Errors
    ///
    /// Classified per [`LockError`]; on failure no token is installed.
    pub async fn enable(
        &self,
        pin: &SecretString,
        ttl_secs: u64,
        already_registered: bool,
    ) -> Result<LockToken, LockError> {
        if already_registered {
            self.backend.delete_lock(pin).await.map_err(classify)?;
        }
        let token = self.backend.create_lock(pin, ttl_secs).await.map_err(classify)?;
        self.install(token.clone(), now_unix());
        Ok(token)
    }

    /// Deletes the registration and drops the token.
    ///
    /// # Errors
    ///
    /// On failure the registration and token are left in place.
    pub async fn disable(&self, pin: &SecretString) -> Result<(), LockError> {
        self.backend.delete_lock(pin).await.map_err(classify)?;
        self.set_token(None);
        Ok(())
    }

    /// Exchanges the PIN for the session's lock token.
    ///
    /// On success an immediate heartbeat restarts the server-side TTL; its
    /// failure is logged and swallowed, the next [`Self::extend_if_due`]
    /// catches up.
    ///
    /// # Errors
    ///
    /// [`LockError::InactiveSession`] is fatal; everything else may be
    /// retried with a corrected PIN.
    pub async fn unlock(&self, pin: &SecretString, now: u64) -> Result<LockToken, LockError> {
        let token = self.backend.unlock(pin).await.map_err(classify)?;
        self.install(token.clone(), now);
        if let Err(err) = self.backend.extend_lock(&token).await {
            tracing::warn!(%err, "post-unlock lock extension failed");
        }
        Ok(token)
    }

    /// Extends the server-side lock session once more than half the TTL has
    /// elapsed.
    ///
    /// Returns whether an extension was performed.
    ///
    /// # Errors
    ///
    /// Surfaces classified extension failures; the due-time is not advanced
    /// on failure.
    pub async fn extend_if_due(&self, ttl_secs: u64, now: u64) -> Result<bool, LockError> {
        let Some(token) = self.token() else {
            return Ok(false);
        };
        let elapsed = now.saturating_sub(self.slot().last_extended);
        if elapsed.saturating_mul(2) <= ttl_secs {
            return Ok(false);
        }
        self.backend.extend_lock(&token).await.map_err(classify)?;
        self.slot().last_extended = now;
        Ok(true)
    }
}

fn lock_failure(err: &LockError) -> ActionFailure {
    if err.is_fatal() {
        ActionFailure::fatal(err.to_string())
    } else {
        ActionFailure::retryable(err.to_string())
    }
}

impl Engine {
    /// Registers a session-lock PIN, replacing an existing registration.
    ///
    /// The cache is re-persisted right away so it is sealed under the new
    /// token-derived key.
    ///
    /// # Errors
    ///
    /// Propagates classified lock failures. A coalesced duplicate returns
    /// `Ok(())` without doing anything.
    pub async fn lock_enable(
        &self,
        pin: &SecretString,
        ttl_secs: u64,
        meta: ActionMeta,
    ) -> EngineResult<()> {
        let key = RequestKey::LockEnable;
        if !self.tracker.start(&key) {
            return Ok(());
        }
        let already_registered = !matches!(self.state_read().lock, LockState::None);

        match self.lock.enable(pin, ttl_secs, already_registered).await {
            Ok(_token) => {
                self.apply_action(&Action::LockEnabled { ttl_secs });
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success("Session lock enabled").with_group(SESSION_LOCK_GROUP),
                );
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(())
            }
            Err(err) => {
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text(
                        "Could not enable session lock",
                        &err.to_string(),
                    ))
                    .with_group(SESSION_LOCK_GROUP),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(lock_failure(&err)));
                Err(err.into())
            }
        }
    }

    /// Removes the session-lock registration.
    ///
    /// # Errors
    ///
    /// On failure the registration is untouched and the error is surfaced.
    pub async fn lock_disable(&self, pin: &SecretString, meta: ActionMeta) -> EngineResult<()> {
        let key = RequestKey::LockDisable;
        if !self.tracker.start(&key) {
            return Ok(());
        }

        match self.lock.disable(pin).await {
            Ok(()) => {
                self.apply_action(&Action::LockDisabled);
                // Re-seal under the unlocked key now that the token is gone.
                self.persist_cache_best_effort();
                self.emit_to(
                    meta.receiver,
                    Notification::success("Session lock disabled").with_group(SESSION_LOCK_GROUP),
                );
                self.tracker.finish(&key, true);
                meta.resolve(Ok(()));
                Ok(())
            }
            Err(err) => {
                self.emit_to(
                    meta.receiver,
                    Notification::error(failure_text(
                        "Could not disable session lock",
                        &err.to_string(),
                    ))
                    .with_group(SESSION_LOCK_GROUP),
                );
                self.tracker.finish(&key, false);
                meta.resolve(Err(lock_failure(&err)));
                Err(err.into())
            }
        }
    }

    /// Exchanges the PIN for the lock token and leaves the locked state.
    ///
    /// The request is acknowledged only after the configured settle delay,
    /// success or not, so context transitions complete before loading
    /// indicators clear. An inactive lock session forces a sign-out.
    ///
    /// # Errors
    ///
    /// Propagates classified lock failures.
    pub async fn unlock(&self, pin: &SecretString, meta: ActionMeta) -> EngineResult<()> {
        let key = RequestKey::LockUnlock;
        if !self.tracker.start(&key) {
            return Ok(());
        }

        let result = self.lock.unlock(pin, now_unix()).await;
        let outcome = match &result {
            Ok(_token) => {
                self.apply_action(&Action::Unlocked);
                if let Err(err) = self.cache.clear_force_lock() {
                    tracing::warn!(%err, "could not clear the force-lock marker");
                }
                self.persist_cache_best_effort();
                // The boot that ran while locked skipped hydration and
                // refresh; rearm so the next wakeup boots for real.
                self.status_tx.send_replace(BootStatus::Idle);
                Ok(())
            }
            Err(err) => {
                if err.is_fatal() {
                    self.sign_out(true).await;
                } else {
                    self.emit_to(
                        meta.receiver,
                        Notification::error(failure_text("Could not unlock", &err.to_string()))
                            .with_group(SESSION_LOCK_GROUP),
                    );
                }
                Err(lock_failure(err))
            }
        };

        tokio::time::sleep(self.config.settle_delay).await;
        self.tracker.finish(&key, outcome.is_ok());
        meta.resolve(outcome);
        result.map(|_| ()).map_err(Into::into)
    }

    /// Locks the session locally, right now.
    ///
    /// The local transition never waits on the network: state is flushed to
    /// the cache under the existing key, the caller is notified, and the
    /// remote session invalidation runs detached. If that remote call fails
    /// a force-lock marker is persisted for the next boot to honor.
    ///
    /// # Errors
    ///
    /// Only local persistence setup can fail; with no lock registered this
    /// is a no-op.
    pub async fn lock_immediate(self: &Arc<Self>, meta: ActionMeta) -> EngineResult<()> {
        if self.lock.token().is_none() {
            meta.resolve(Ok(()));
            return Ok(());
        }

        self.apply_action(&Action::Locked);
        self.persist_cache_best_effort();
        self.emit_to(
            meta.receiver,
            Notification::info("Session locked").with_group(SESSION_LOCK_GROUP),
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = engine.backend.revoke_session().await {
                tracing::warn!(%err, "remote session revoke unconfirmed, forcing lock at next boot");
                if let Err(err) = engine.cache.set_force_lock() {
                    tracing::warn!(%err, "could not persist the force-lock marker");
                }
            }
        });

        meta.resolve(Ok(()));
        Ok(())
    }

    /// Opportunistic lock heartbeat; extends the server-side session when
    /// more than half the TTL has elapsed.
    ///
    /// Returns whether an extension was sent.
    ///
    /// # Errors
    ///
    /// Propagates classified extension failures.
    pub async fn check_lock(&self) -> EngineResult<bool> {
        let lock_state = self.state_read().lock;
        let LockState::Registered { ttl_secs } = lock_state else {
            return Ok(false);
        };
        Ok(self.lock.extend_if_due(ttl_secs, now_unix()).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_case::test_case;

    use super::*;
    use crate::test_support::{test_rig, test_session, MemoryBackend};
    use crate::types::ContextId;

    fn pin() -> SecretString {
        SecretString::from("1234".to_owned())
    }

    #[tokio::test]
    async fn test_enable_deletes_the_old_lock_first() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionLockManager::new(Arc::clone(&backend) as Arc<dyn Backend>);

        manager.enable(&pin(), 600, true).await.expect("enable");

        let calls = backend.calls();
        let delete = calls.iter().position(|c| c == "lock::delete");
        let create = calls.iter().position(|c| c == "lock::create");
        assert!(delete.expect("delete issued") < create.expect("create issued"));
        assert!(manager.token().is_some());
    }

    #[tokio::test]
    async fn test_fresh_enable_skips_the_delete() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionLockManager::new(Arc::clone(&backend) as Arc<dyn Backend>);

        manager.enable(&pin(), 600, false).await.expect("enable");

        assert!(!backend.calls().iter().any(|c| c == "lock::delete"));
    }

    #[tokio::test]
    async fn test_failed_create_after_delete_installs_no_token() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_with(
            "lock::create",
            ApiError::Status {
                status: 422,
                code: Some(CODE_WRONG_LOCK_PIN),
                message: Some("Invalid lock code".to_owned()),
            },
        );
        let manager = SessionLockManager::new(Arc::clone(&backend) as Arc<dyn Backend>);

        let err = manager.enable(&pin(), 600, true).await.expect_err("fails");
        assert!(matches!(err, LockError::WrongCredential(_)));
        assert!(manager.token().is_none());
        // The stale remote lock was still deleted; nothing is orphaned.
        assert!(backend.calls().iter().any(|c| c == "lock::delete"));
    }

    #[tokio::test]
    async fn test_unlock_installs_token_and_heartbeats() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionLockManager::new(Arc::clone(&backend) as Arc<dyn Backend>);

        manager.unlock(&pin(), 1_000).await.expect("unlock");

        assert!(manager.token().is_some());
        let calls = backend.calls();
        let unlock = calls.iter().position(|c| c == "lock::unlock");
        let extend = calls.iter().position(|c| c == "lock::extend");
        assert!(unlock.expect("unlock issued") < extend.expect("heartbeat issued"));
    }

    #[tokio::test]
    async fn test_inactive_session_is_fatal_wrong_pin_is_not() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_with(
            "lock::unlock",
            ApiError::Status {
                status: 422,
                code: Some(CODE_LOCK_INACTIVE),
                message: None,
            },
        );
        let manager = SessionLockManager::new(Arc::clone(&backend) as Arc<dyn Backend>);
        let err = manager.unlock(&pin(), 0).await.expect_err("inactive");
        assert!(err.is_fatal());

        backend.fail_with(
            "lock::unlock",
            ApiError::Status {
                status: 422,
                code: Some(CODE_WRONG_LOCK_PIN),
                message: Some("Invalid lock code".to_owned()),
            },
        );
        let err = manager.unlock(&pin(), 0).await.expect_err("wrong pin");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Invalid lock code");
    }

    #[test_case(1_049, false; "just under half the ttl")]
    #[test_case(1_050, false; "at exactly half the ttl")]
    #[test_case(1_051, true; "just past half the ttl")]
    #[test_case(2_000, true; "well past half the ttl")]
    #[tokio::test]
    async fn test_extension_waits_for_more_than_half_the_ttl(now: u64, extended: bool) {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionLockManager::new(Arc::clone(&backend) as Arc<dyn Backend>);
        manager.install(LockToken::new("token-1"), 1_000);

        let did = manager.extend_if_due(100, now).await.expect("extend");
        assert_eq!(did, extended);
    }

    #[tokio::test]
    async fn test_extension_without_token_is_a_no_op() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionLockManager::new(Arc::clone(&backend) as Arc<dyn Backend>);
        assert!(!manager.extend_if_due(100, u64::MAX).await.expect("noop"));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = LockToken::new("super-secret");
        let rendered = format!("{token:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_classification_of_transport_errors() {
        let err = classify(ApiError::Network {
            url: "https://api.vaultkit.app/auth/v1/lock".to_owned(),
            status: Some(500),
            error: "bad status".to_owned(),
        });
        assert!(matches!(err, LockError::Api(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_gone_status_counts_as_inactive() {
        let err = classify(ApiError::Status {
            status: 410,
            code: None,
            message: None,
        });
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_lock_immediate_returns_while_revocation_hangs() {
        let rig = test_rig();
        rig.engine.apply_action(&Action::LockEnabled { ttl_secs: 300 });
        rig.engine.lock.set_token(Some(LockToken::new("token-1")));
        rig.backend.hang("session::revoke");

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::time::timeout(
            Duration::from_millis(100),
            rig.engine
                .lock_immediate(ActionMeta::default().with_callback(tx)),
        )
        .await
        .expect("returns without waiting on the network")
        .expect("locks");

        assert_eq!(rig.engine.state().lock, LockState::Locked { ttl_secs: 300 });
        assert!(rx.await.expect("acknowledged").is_ok());
    }

    #[tokio::test]
    async fn test_failed_revocation_persists_the_force_lock_marker() {
        let rig = test_rig();
        rig.engine.apply_action(&Action::LockEnabled { ttl_secs: 300 });
        rig.engine.lock.set_token(Some(LockToken::new("token-1")));
        rig.backend.fail_with(
            "session::revoke",
            ApiError::Network {
                url: "https://api.vaultkit.app/auth/v1/session".to_owned(),
                status: None,
                error: "offline".to_owned(),
            },
        );

        rig.engine
            .lock_immediate(ActionMeta::default())
            .await
            .expect("locks");

        // Let the detached revocation run and fail.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rig
            .engine
            .cache
            .force_lock_pending()
            .expect("marker readable"));
    }

    #[tokio::test]
    async fn test_unlock_clears_the_marker_and_rearms_boot() {
        let rig = test_rig();
        rig.engine.set_session(test_session());
        rig.engine
            .wakeup(ContextId::generate())
            .await
            .expect("boot");
        rig.engine.apply_action(&Action::LockEnabled { ttl_secs: 300 });
        rig.engine.lock.set_token(Some(LockToken::new("token-1")));
        rig.engine
            .lock_immediate(ActionMeta::default())
            .await
            .expect("lock");
        rig.engine.cache.set_force_lock().expect("marker");

        rig.engine
            .unlock(&pin(), ActionMeta::default())
            .await
            .expect("unlock");

        assert_eq!(
            rig.engine.state().lock,
            LockState::Registered { ttl_secs: 300 }
        );
        assert!(!rig
            .engine
            .cache
            .force_lock_pending()
            .expect("marker readable"));
        assert_eq!(rig.engine.status(), BootStatus::Idle);
        // The exchange returned the stable server-side token.
        assert_eq!(
            rig.engine.lock.token().expect("token").as_str(),
            "server-token"
        );
    }

    #[tokio::test]
    async fn test_fatal_unlock_forces_sign_out() {
        let rig = test_rig();
        rig.engine.set_session(test_session());
        rig.backend.fail_with(
            "lock::unlock",
            ApiError::Status {
                status: 410,
                code: None,
                message: None,
            },
        );

        rig.engine
            .unlock(&pin(), ActionMeta::default())
            .await
            .expect_err("inactive session");

        assert!(!rig.engine.has_session());
        assert_eq!(rig.engine.status(), BootStatus::Idle);
    }

    #[tokio::test]
    async fn test_enable_reseals_the_cache_under_the_token_key() {
        let rig = test_rig();
        rig.engine.set_session(test_session());
        rig.engine
            .wakeup(ContextId::generate())
            .await
            .expect("boot");

        rig.engine
            .lock_enable(&pin(), 600, ActionMeta::default())
            .await
            .expect("enable");

        let token = rig.engine.lock.token().expect("token installed");
        assert!(rig
            .engine
            .cache
            .decrypt_cache(Some(&token))
            .expect("read")
            .is_some());
        // Without the token the same blobs are unreadable.
        assert!(rig.engine.cache.decrypt_cache(None).expect("read").is_none());
    }
}
