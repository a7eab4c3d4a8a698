#![allow(missing_docs, dead_code, reason = "used in tests")]

//! Common test utilities shared across integration tests.
//!
//! [`InMemoryServer`] is a stateful stand-in for the real backend: it keeps
//! an item table and a lock registration, so multi-step flows (create, then
//! trash, then restart, then sync) observe consistent server-side effects
//! instead of scripted responses.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use vaultkit_core::api::{
    Address, AliasOptions, ApiError, Backend, CreateItemCall, EventBatch, FeatureFlags, ItemRef,
    Plan, RemoteItem, RemoteUser, CODE_WRONG_LOCK_PIN,
};
use vaultkit_core::crypto::{CryptoEngine, CryptoError, CryptoSnapshot};
use vaultkit_core::types::{EventId, Session, ShareId, UserId};
use vaultkit_core::{Engine, EngineConfig, LockToken};
use vaultkit_store::{LocalStore, MemoryStore};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ServerLock {
    pin: String,
    token: String,
}

/// In-memory backend holding real server-side state.
///
/// Named endpoints can be scripted to fail or hang; everything else behaves
/// like a small, consistent server. The session lock is a single slot:
/// creating a second registration without deleting the first is rejected,
/// like the real API would.
#[derive(Default)]
pub struct InMemoryServer {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, ApiError>>,
    hangs: Mutex<HashSet<String>>,
    items: Mutex<BTreeMap<String, RemoteItem>>,
    deleted_log: Mutex<Vec<String>>,
    bulk_deletes: Mutex<Vec<Vec<String>>>,
    client_ids: Mutex<Vec<String>>,
    lock: Mutex<Option<ServerLock>>,
    item_seq: AtomicU64,
    lock_seq: AtomicU64,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    pub fn count(&self, name: &str) -> usize {
        guard(&self.calls).iter().filter(|c| *c == name).count()
    }

    pub fn fail_with(&self, name: &str, error: ApiError) {
        guard(&self.failures).insert(name.to_owned(), error);
    }

    pub fn clear_failure(&self, name: &str) {
        guard(&self.failures).remove(name);
    }

    pub fn hang(&self, name: &str) {
        guard(&self.hangs).insert(name.to_owned());
    }

    /// Puts an item into the server table without going through the API.
    pub fn seed_item(&self, item_id: &str, name: &str, trashed: bool) {
        let item = RemoteItem {
            item_id: item_id.to_owned(),
            share_id: ShareId::new("share-1"),
            kind: vaultkit_core::api::ItemKind::Note,
            name: name.to_owned(),
            content: serde_json::json!({}),
            trashed,
        };
        guard(&self.items).insert(item_id.to_owned(), item);
    }

    /// Number of items currently held by the server.
    pub fn item_count(&self) -> usize {
        guard(&self.items).len()
    }

    /// Whether the server currently holds a lock registration.
    pub fn has_lock(&self) -> bool {
        guard(&self.lock).is_some()
    }

    /// Drops the registration server-side, as a TTL expiry would.
    pub fn expire_lock(&self) {
        *guard(&self.lock) = None;
    }

    /// Client references seen by the create endpoints, in call order.
    pub fn client_ids(&self) -> Vec<String> {
        guard(&self.client_ids).clone()
    }

    /// Item-id sets passed to the bulk delete endpoint, in call order.
    pub fn bulk_deletes(&self) -> Vec<Vec<String>> {
        guard(&self.bulk_deletes).clone()
    }

    async fn enter(&self, name: &str) -> Result<(), ApiError> {
        guard(&self.calls).push(name.to_owned());
        // One real suspension point per call, so concurrency tests see the
        // interleaving a network round-trip would produce.
        tokio::task::yield_now().await;
        if guard(&self.hangs).contains(name) {
            std::future::pending::<()>().await;
        }
        match guard(&self.failures).get(name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn store_item(&self, call: &CreateItemCall) -> RemoteItem {
        let n = self.item_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let item = RemoteItem {
            item_id: format!("srv-{n}"),
            share_id: call.share_id.clone(),
            kind: call.kind,
            name: call.name.clone(),
            content: call.content.clone(),
            trashed: false,
        };
        guard(&self.items).insert(item.item_id.clone(), item.clone());
        item
    }

    fn set_trashed(&self, item_id: &str, trashed: bool) -> Result<(), ApiError> {
        match guard(&self.items).get_mut(item_id) {
            Some(item) => {
                item.trashed = trashed;
                Ok(())
            }
            None => Err(ApiError::Status {
                status: 404,
                code: None,
                message: Some(format!("no item {item_id}")),
            }),
        }
    }

    fn remove_item(&self, item_id: &str) {
        if guard(&self.items).remove(item_id).is_some() {
            guard(&self.deleted_log).push(item_id.to_owned());
        }
    }
}

#[async_trait]
impl Backend for InMemoryServer {
    async fn fetch_user(&self) -> Result<RemoteUser, ApiError> {
        self.enter("fetch_user").await?;
        Ok(RemoteUser {
            id: UserId::new("user-1"),
            email: "ada@vaultkit.test".to_owned(),
            display_name: Some("Ada".to_owned()),
        })
    }

    async fn fetch_addresses(&self) -> Result<Vec<Address>, ApiError> {
        self.enter("fetch_addresses").await?;
        Ok(vec![Address {
            id: "address-1".to_owned(),
            email: "ada@vaultkit.test".to_owned(),
        }])
    }

    async fn fetch_latest_event_id(&self) -> Result<EventId, ApiError> {
        self.enter("fetch_latest_event_id").await?;
        Ok(EventId::new("evt-head"))
    }

    async fn fetch_plan(&self) -> Result<Plan, ApiError> {
        self.enter("fetch_plan").await?;
        Ok(Plan::free())
    }

    async fn fetch_features(&self) -> Result<FeatureFlags, ApiError> {
        self.enter("fetch_features").await?;
        Ok(FeatureFlags::default())
    }

    async fn fetch_alias_options(&self) -> Result<AliasOptions, ApiError> {
        self.enter("fetch_alias_options").await?;
        Ok(AliasOptions {
            suffixes: vec![".mail".to_owned()],
            mailboxes: vec!["inbox@vaultkit.test".to_owned()],
        })
    }

    async fn sync_events(&self, _cursor: &EventId) -> Result<EventBatch, ApiError> {
        self.enter("sync_events").await?;
        // Deltas are not modeled; every sync replays the full table plus
        // everything ever deleted, which upserts idempotently client-side.
        Ok(EventBatch {
            latest: EventId::new("evt-head"),
            upserted: guard(&self.items).values().cloned().collect(),
            deleted: guard(&self.deleted_log).clone(),
        })
    }

    async fn create_item(&self, call: &CreateItemCall) -> Result<RemoteItem, ApiError> {
        guard(&self.client_ids).push(call.client_id.clone());
        self.enter("create_item").await?;
        Ok(self.store_item(call))
    }

    async fn create_item_pair(
        &self,
        primary: &CreateItemCall,
        companion: &CreateItemCall,
    ) -> Result<(RemoteItem, RemoteItem), ApiError> {
        guard(&self.client_ids).push(primary.client_id.clone());
        guard(&self.client_ids).push(companion.client_id.clone());
        self.enter("create_item_pair").await?;
        Ok((self.store_item(primary), self.store_item(companion)))
    }

    async fn trash_item(&self, _share_id: &ShareId, item_id: &str) -> Result<(), ApiError> {
        self.enter("trash_item").await?;
        self.set_trashed(item_id, true)
    }

    async fn restore_item(&self, _share_id: &ShareId, item_id: &str) -> Result<(), ApiError> {
        self.enter("restore_item").await?;
        self.set_trashed(item_id, false)
    }

    async fn delete_item(&self, _share_id: &ShareId, item_id: &str) -> Result<(), ApiError> {
        self.enter("delete_item").await?;
        self.remove_item(item_id);
        Ok(())
    }

    async fn delete_items(&self, items: &[ItemRef]) -> Result<(), ApiError> {
        guard(&self.bulk_deletes).push(items.iter().map(|r| r.item_id.clone()).collect());
        self.enter("delete_items").await?;
        for item in items {
            self.remove_item(&item.item_id);
        }
        Ok(())
    }

    async fn restore_items(&self, items: &[ItemRef]) -> Result<(), ApiError> {
        self.enter("restore_items").await?;
        for item in items {
            self.set_trashed(&item.item_id, false)?;
        }
        Ok(())
    }

    async fn create_lock(&self, pin: &SecretString, _ttl_secs: u64) -> Result<LockToken, ApiError> {
        self.enter("create_lock").await?;
        let mut slot = guard(&self.lock);
        if slot.is_some() {
            return Err(ApiError::Status {
                status: 409,
                code: None,
                message: Some("a lock is already registered".to_owned()),
            });
        }
        let n = self.lock_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("srv-lock-{n}");
        *slot = Some(ServerLock {
            pin: pin.expose_secret().to_owned(),
            token: token.clone(),
        });
        Ok(LockToken::new(token))
    }

    async fn delete_lock(&self, _pin: &SecretString) -> Result<(), ApiError> {
        // Deletion is authorized by the session, not the PIN; replacing a
        // forgotten PIN must stay possible.
        self.enter("delete_lock").await?;
        *guard(&self.lock) = None;
        Ok(())
    }

    async fn unlock(&self, pin: &SecretString) -> Result<LockToken, ApiError> {
        self.enter("unlock").await?;
        let slot = guard(&self.lock);
        let Some(lock) = slot.as_ref() else {
            return Err(ApiError::Status {
                status: 410,
                code: None,
                message: Some("no active lock".to_owned()),
            });
        };
        if lock.pin != pin.expose_secret() {
            return Err(ApiError::Status {
                status: 422,
                code: Some(CODE_WRONG_LOCK_PIN),
                message: Some("Invalid lock code".to_owned()),
            });
        }
        Ok(LockToken::new(lock.token.clone()))
    }

    async fn extend_lock(&self, token: &LockToken) -> Result<(), ApiError> {
        self.enter("extend_lock").await?;
        let slot = guard(&self.lock);
        match slot.as_ref() {
            Some(lock) if lock.token == token.as_str() => Ok(()),
            _ => Err(ApiError::Status {
                status: 410,
                code: None,
                message: Some("no active lock".to_owned()),
            }),
        }
    }

    async fn revoke_session(&self) -> Result<(), ApiError> {
        self.enter("revoke_session").await
    }
}

/// Crypto engine that hands back whatever snapshot it is given.
#[derive(Default)]
pub struct PassthroughCrypto;

#[async_trait]
impl CryptoEngine for PassthroughCrypto {
    async fn hydrate(
        &self,
        _session: &Session,
        _addresses: &[Address],
        snapshot: Option<&CryptoSnapshot>,
    ) -> Result<CryptoSnapshot, CryptoError> {
        Ok(snapshot
            .cloned()
            .unwrap_or_else(|| CryptoSnapshot::new(b"hydrated".to_vec())))
    }

    async fn clear(&self) {}
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

pub fn test_session() -> Session {
    Session::new(UserId::new("user-1"), vec![7; 32])
}

pub fn pin(digits: &str) -> SecretString {
    SecretString::from(digits.to_owned())
}

/// Production defaults minus the UI settle delay.
pub fn quick_config() -> EngineConfig {
    EngineConfig {
        settle_delay: std::time::Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn engine_over(store: Arc<dyn LocalStore>, server: Arc<InMemoryServer>) -> Arc<Engine> {
    Engine::new(
        quick_config(),
        store,
        server as Arc<dyn Backend>,
        Arc::new(PassthroughCrypto),
    )
}

/// A signed-in engine over a fresh in-memory store and server.
pub fn signed_in_engine() -> (Arc<Engine>, Arc<InMemoryServer>) {
    let server = Arc::new(InMemoryServer::new());
    let engine = engine_over(Arc::new(MemoryStore::new()), Arc::clone(&server));
    engine.set_session(test_session());
    (engine, server)
}
