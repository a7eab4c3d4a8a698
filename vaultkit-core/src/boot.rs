//! The boot sequence: cache restore, crypto hydration, user-data refresh,
//! and partial event resync.
//!
//! Boot never retries itself. It either completes, or reports one failure
//! and leaves retry to the next wakeup.

use thiserror::Error;
use vaultkit_store::StoreError;

use crate::action::{Action, ResolvedUserData};
use crate::api::{ApiError, Backend, FeatureFlags, Plan};
use crate::crypto::CryptoError;
use crate::engine::Engine;
use crate::lock::LockState;
use crate::state::ItemRecord;
use crate::types::{now_unix, Fetched};

/// Global boot lifecycle observed by wakeups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    /// No boot attempted since process start (or since an unlock rearmed
    /// the sequence).
    Idle,
    /// A boot is running.
    Booting,
    /// A boot is running after an earlier attempt failed.
    Resuming,
    /// Boot completed; state is live.
    Ready,
    /// The last boot failed; the next wakeup retries.
    Error,
}

/// What a completed boot did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    /// No usable cache entry existed; everything came from the network.
    pub cold: bool,
    /// Boot stopped early because the session must come up locked.
    pub locked: bool,
}

/// Failures that abort a boot.
#[derive(Debug, Error)]
pub enum BootError {
    /// Boot was attempted with no authenticated session installed.
    #[error("no active session")]
    NoSession,

    /// The local store failed; nothing to do but report.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The crypto engine rejected the session material or snapshot. The
    /// cache that fed it cannot be trusted.
    #[error(transparent)]
    CryptoHydration(#[from] CryptoError),

    /// A required user-data fetch failed.
    #[error("user data fetch failed: {0}")]
    UserData(#[source] ApiError),

    /// The event resync failed.
    #[error("event resync failed: {0}")]
    Resync(#[source] ApiError),
}

impl BootError {
    /// Whether the cache must be dropped before the next boot attempt.
    #[must_use]
    pub const fn must_purge_cache(&self) -> bool {
        matches!(self, Self::CryptoHydration(_))
    }
}

/// Reuses `existing` when present, otherwise awaits the fetch.
async fn resolve_required<T, F>(existing: Option<T>, fetch: F) -> Result<T, ApiError>
where
    F: std::future::Future<Output = Result<T, ApiError>>,
{
    match existing {
        Some(value) => Ok(value),
        None => fetch.await,
    }
}

/// Plan staleness rule: a running trial or a fetch within the window keeps
/// the cached value; otherwise refetch, and on failure fall back rather
/// than failing boot.
async fn resolve_plan(
    backend: &dyn Backend,
    existing: Option<Fetched<Plan>>,
    window_secs: u64,
    now: u64,
) -> Fetched<Plan> {
    match existing {
        Some(plan)
            if plan.value.trial_end.is_some_and(|end| end > now)
                || plan.fresh_within(window_secs, now) =>
        {
            plan
        }
        existing => match backend.fetch_plan().await {
            Ok(fresh) => Fetched::new(fresh, now),
            Err(err) => {
                tracing::warn!(%err, "plan fetch failed, falling back to the last known value");
                // A zero stamp keeps the fallback stale for the next boot.
                existing.unwrap_or_else(|| Fetched::new(Plan::free(), 0))
            }
        },
    }
}

/// Feature flags follow the same window rule as the plan, minus the trial
/// exception.
async fn resolve_features(
    backend: &dyn Backend,
    existing: Option<Fetched<FeatureFlags>>,
    window_secs: u64,
    now: u64,
) -> Fetched<FeatureFlags> {
    match existing {
        Some(features) if features.fresh_within(window_secs, now) => features,
        existing => match backend.fetch_features().await {
            Ok(fresh) => Fetched::new(fresh, now),
            Err(err) => {
                tracing::warn!(%err, "feature flags fetch failed, falling back to the last known value");
                existing.unwrap_or_else(|| Fetched::new(FeatureFlags::default(), 0))
            }
        },
    }
}

impl Engine {
    /// Runs the boot sequence once.
    ///
    /// # Errors
    ///
    /// Returns the first fatal step failure. [`BootError::must_purge_cache`]
    /// tells the caller whether the cache has to go before the next try;
    /// every other failure leaves the cache reusable.
    pub(crate) async fn boot(&self) -> Result<BootReport, BootError> {
        let Some(session) = self.current_session() else {
            return Err(BootError::NoSession);
        };

        let force_lock = self.cache.force_lock_pending()?;
        let token = self.lock.token();
        let cached = self.cache.decrypt_cache(token.as_ref())?;
        let cold = cached.is_none();

        let mut snapshot = None;
        if let Some(hit) = cached {
            self.apply_action(&Action::CacheRestored(Box::new(hit.state)));
            snapshot = Some(hit.snapshot);
        }

        // The marker wins even over a cache miss: with the lock token gone
        // from memory the cache cannot decrypt, yet the session must still
        // come up locked.
        let lock_state = self.state_read().lock;
        if force_lock || matches!(lock_state, LockState::Locked { .. }) {
            // No hydration or refresh behind the lock screen; a successful
            // unlock rearms a full boot.
            self.apply_action(&Action::Locked);
            return Ok(BootReport { cold, locked: true });
        }

        let addresses = self.state_read().addresses.clone();
        let hydrated = self
            .crypto
            .hydrate(&session, &addresses, snapshot.as_ref())
            .await?;
        self.set_snapshot(hydrated);

        let window_secs = self.config.staleness_window_secs;
        let now = now_unix();
        let (cached_user, cached_addresses, cached_event, cached_plan, cached_features) = {
            let state = self.state_read();
            (
                state.user.clone(),
                state.addresses.clone(),
                state.event_id.clone(),
                state.plan.clone(),
                state.features.clone(),
            )
        };

        let backend = self.backend.as_ref();
        let (user, addresses, event_id, plan, features) = tokio::join!(
            resolve_required(cached_user, backend.fetch_user()),
            resolve_required(
                (!cached_addresses.is_empty()).then_some(cached_addresses),
                backend.fetch_addresses(),
            ),
            resolve_required(cached_event, backend.fetch_latest_event_id()),
            resolve_plan(backend, cached_plan, window_secs, now),
            resolve_features(backend, cached_features, window_secs, now),
        );
        let user = user.map_err(BootError::UserData)?;
        let addresses = addresses.map_err(BootError::UserData)?;
        let event_id = event_id.map_err(BootError::UserData)?;

        self.apply_action(&Action::UserDataResolved(Box::new(ResolvedUserData {
            user,
            addresses,
            event_id: event_id.clone(),
            plan,
            features,
        })));

        let batch = self
            .backend
            .sync_events(&event_id)
            .await
            .map_err(BootError::Resync)?;
        let deleted = batch.deleted_ids();
        let upserted: Vec<ItemRecord> = batch.upserted.into_iter().map(ItemRecord::from).collect();
        self.apply_action(&Action::EventsSynced {
            latest: batch.latest,
            upserted,
            deleted,
        });

        self.persist_cache_best_effort();
        Ok(BootReport {
            cold,
            locked: false,
        })
    }
}
