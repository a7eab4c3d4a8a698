//! Background state-synchronization engine for a credential-management
//! client.
//!
//! One [`Engine`] instance serves every context of the running client
//! (browser action, side panel, options page, ...). Contexts talk to it over
//! an in-process [`bus`]; the engine owns the authoritative [`AppState`] and
//! is the only writer to it.
//!
//! The moving parts:
//!
//! - [`Engine::wakeup`] — single-flight boot: the first context to wake the
//!   engine runs the boot sequence (cache restore, crypto hydration, user
//!   data refresh, partial event sync); concurrent and later wakeups reuse
//!   its outcome.
//! - [`cache`] — the encrypted local cache, sealed under a key derived from
//!   a persisted salt and the session-lock token.
//! - [`lock`] — the PIN-gated session lock; while registered, the cache is
//!   unreadable without the server-held token.
//! - [`state`] + [`action`] — the state tree and the actions that are its
//!   sole mutation path. Item mutations apply optimistically and roll back
//!   on failure.
//! - [`api`] — the [`Backend`] seam and its HTTP implementation.
//!
//! Persistence lives in `vaultkit-store`; this crate decides *when* and
//! *under which key* bytes are written, never *how*.

pub mod action;
pub mod api;
pub mod boot;
pub mod bus;
pub mod cache;
pub mod config;
pub mod crypto;
mod engine;
pub mod error;
mod items;
pub mod lock;
pub mod notification;
pub mod request;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use action::{Action, ActionMeta, ActionResult};
pub use api::{Backend, HttpBackend};
pub use boot::BootStatus;
pub use bus::{BusMessage, InProcBus, Target};
pub use config::{EngineConfig, Environment};
pub use crypto::{CryptoEngine, CryptoSnapshot};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use lock::{LockState, LockToken};
pub use notification::Notification;
pub use request::RequestKey;
pub use state::AppState;
pub use types::{ContextId, ItemId, Session};
