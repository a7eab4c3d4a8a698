//! Scripted fakes shared by the engine test modules.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use vaultkit_store::{LocalStore, MemoryStore};

use crate::api::{
    Address, AliasOptions, ApiError, Backend, CreateItemCall, EventBatch, FeatureFlags, ItemRef,
    Plan, RemoteItem, RemoteUser,
};
use crate::config::EngineConfig;
use crate::crypto::{CryptoEngine, CryptoError, CryptoSnapshot};
use crate::engine::Engine;
use crate::lock::LockToken;
use crate::types::{EventId, Session, ShareId, UserId};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`Backend`] that logs every call by name.
///
/// `fail_with` scripts a named call to keep returning an error until the
/// script is replaced; `hang` makes a named call never resolve.
#[derive(Default)]
pub struct MemoryBackend {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, ApiError>>,
    hangs: Mutex<HashSet<String>>,
    batch: Mutex<Option<EventBatch>>,
    client_ids: Mutex<Vec<String>>,
    deleted_refs: Mutex<Vec<Vec<String>>>,
    item_seq: AtomicU64,
    lock_seq: AtomicU64,
}

impl MemoryBackend {
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

    pub fn set_batch(&self, batch: EventBatch) {
        *guard(&self.batch) = Some(batch);
    }

    /// Client references seen by the create endpoints, in call order.
    pub fn client_ids(&self) -> Vec<String> {
        guard(&self.client_ids).clone()
    }

    /// Item-id sets passed to the bulk delete endpoint, in call order.
    pub fn deleted_refs(&self) -> Vec<Vec<String>> {
        guard(&self.deleted_refs).clone()
    }

    async fn enter(&self, name: &str) -> Result<(), ApiError> {
        guard(&self.calls).push(name.to_owned());
        // One real suspension point per call, so interleaving tests see the
        // same scheduling a network backend would produce.
        tokio::task::yield_now().await;
        if guard(&self.hangs).contains(name) {
            std::future::pending::<()>().await;
        }
        match guard(&self.failures).get(name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn remote_from(&self, call: &CreateItemCall) -> RemoteItem {
        let n = self.item_seq.fetch_add(1, Ordering::SeqCst) + 1;
        RemoteItem {
            item_id: format!("item-{n}"),
            share_id: call.share_id.clone(),
            kind: call.kind,
            name: call.name.clone(),
            content: call.content.clone(),
            trashed: false,
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_user(&self) -> Result<RemoteUser, ApiError> {
        self.enter("user").await?;
        Ok(RemoteUser {
            id: UserId::new("user-1"),
            email: "user@vaultkit.test".to_owned(),
            display_name: None,
        })
    }

    async fn fetch_addresses(&self) -> Result<Vec<Address>, ApiError> {
        self.enter("addresses").await?;
        Ok(vec![Address {
            id: "address-1".to_owned(),
            email: "user@vaultkit.test".to_owned(),
        }])
    }

    async fn fetch_latest_event_id(&self) -> Result<EventId, ApiError> {
        self.enter("events::latest").await?;
        Ok(EventId::new("event-1"))
    }

    async fn fetch_plan(&self) -> Result<Plan, ApiError> {
        self.enter("plan").await?;
        Ok(Plan::free())
    }

    async fn fetch_features(&self) -> Result<FeatureFlags, ApiError> {
        self.enter("features").await?;
        Ok(FeatureFlags::default())
    }

    async fn fetch_alias_options(&self) -> Result<AliasOptions, ApiError> {
        self.enter("alias::options").await?;
        Ok(AliasOptions {
            suffixes: vec![".dev".to_owned()],
            mailboxes: vec!["inbox@vaultkit.test".to_owned()],
        })
    }

    async fn sync_events(&self, cursor: &EventId) -> Result<EventBatch, ApiError> {
        self.enter("events::sync").await?;
        let scripted = guard(&self.batch).take();
        Ok(scripted.unwrap_or_else(|| EventBatch {
            latest: cursor.clone(),
            upserted: Vec::new(),
            deleted: Vec::new(),
        }))
    }

    async fn create_item(&self, call: &CreateItemCall) -> Result<RemoteItem, ApiError> {
        guard(&self.client_ids).push(call.client_id.clone());
        self.enter("item::create").await?;
        Ok(self.remote_from(call))
    }

    async fn create_item_pair(
        &self,
        primary: &CreateItemCall,
        companion: &CreateItemCall,
    ) -> Result<(RemoteItem, RemoteItem), ApiError> {
        guard(&self.client_ids).push(primary.client_id.clone());
        guard(&self.client_ids).push(companion.client_id.clone());
        self.enter("item::create_pair").await?;
        Ok((self.remote_from(primary), self.remote_from(companion)))
    }

    async fn trash_item(&self, _share_id: &ShareId, _item_id: &str) -> Result<(), ApiError> {
        self.enter("item::trash").await
    }

    async fn restore_item(&self, _share_id: &ShareId, _item_id: &str) -> Result<(), ApiError> {
        self.enter("item::restore").await
    }

    async fn delete_item(&self, _share_id: &ShareId, _item_id: &str) -> Result<(), ApiError> {
        self.enter("item::delete").await
    }

    async fn delete_items(&self, items: &[ItemRef]) -> Result<(), ApiError> {
        guard(&self.deleted_refs).push(items.iter().map(|r| r.item_id.clone()).collect());
        self.enter("items::delete").await
    }

    async fn restore_items(&self, _items: &[ItemRef]) -> Result<(), ApiError> {
        self.enter("items::restore").await
    }

    async fn create_lock(
        &self,
        _pin: &SecretString,
        _ttl_secs: u64,
    ) -> Result<LockToken, ApiError> {
        self.enter("lock::create").await?;
        let n = self.lock_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LockToken::new(format!("lock-token-{n}")))
    }

    async fn delete_lock(&self, _pin: &SecretString) -> Result<(), ApiError> {
        self.enter("lock::delete").await
    }

    async fn unlock(&self, _pin: &SecretString) -> Result<LockToken, ApiError> {
        self.enter("lock::unlock").await?;
        // The registered token is stable across unlocks.
        Ok(LockToken::new("server-token"))
    }

    async fn extend_lock(&self, _token: &LockToken) -> Result<(), ApiError> {
        self.enter("lock::extend").await
    }

    async fn revoke_session(&self) -> Result<(), ApiError> {
        self.enter("session::revoke").await
    }
}

/// Crypto engine returning a fixed snapshot, with a scriptable failure
/// switch and a hydration counter.
#[derive(Default)]
pub struct StaticCrypto {
    fail: AtomicBool,
    hydrations: AtomicUsize,
}

impl StaticCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn hydrations(&self) -> usize {
        self.hydrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CryptoEngine for StaticCrypto {
    async fn hydrate(
        &self,
        _session: &Session,
        _addresses: &[Address],
        snapshot: Option<&CryptoSnapshot>,
    ) -> Result<CryptoSnapshot, CryptoError> {
        self.hydrations.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CryptoError::new("scripted hydration failure"));
        }
        Ok(snapshot
            .cloned()
            .unwrap_or_else(|| CryptoSnapshot::new(b"snapshot".to_vec())))
    }

    async fn clear(&self) {}
}

/// A fully wired engine over in-memory fakes.
pub struct TestRig {
    pub engine: Arc<Engine>,
    pub backend: Arc<MemoryBackend>,
    pub crypto: Arc<StaticCrypto>,
}

pub fn test_session() -> Session {
    Session::new(UserId::new("user-1"), vec![1; 32])
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        settle_delay: Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn test_rig_on(store: Arc<dyn LocalStore>) -> TestRig {
    let backend = Arc::new(MemoryBackend::new());
    let crypto = Arc::new(StaticCrypto::new());
    let engine = Engine::new(
        test_config(),
        store,
        Arc::clone(&backend) as Arc<dyn Backend>,
        Arc::clone(&crypto) as Arc<dyn CryptoEngine>,
    );
    TestRig {
        engine,
        backend,
        crypto,
    }
}

pub fn test_rig() -> TestRig {
    test_rig_on(Arc::new(MemoryStore::new()))
}

pub fn test_engine() -> (Arc<Engine>, Arc<MemoryBackend>) {
    let rig = test_rig();
    (rig.engine, rig.backend)
}

pub fn test_engine_on(store: Arc<dyn LocalStore>) -> (Arc<Engine>, Arc<MemoryBackend>) {
    let rig = test_rig_on(store);
    (rig.engine, rig.backend)
}
