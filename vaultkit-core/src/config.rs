//! Engine configuration.

use std::time::Duration;

use strum::EnumString;

/// Delay before a lock request is acknowledged, so UI transition animations
/// finish before the loading indicator clears.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Maximum age of plan/feature snapshots before boot refetches them.
pub const DEFAULT_STALENESS_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Default capacity of the in-process broadcast bus.
pub const DEFAULT_BUS_CAPACITY: usize = 128;

/// Deployment environment the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Staging backend.
    Staging,
    /// Production backend.
    Production,
}

impl Environment {
    /// Base URL of the backend API for this environment.
    #[must_use]
    pub const fn api_base_url(&self) -> &'static str {
        match self {
            Self::Staging => "https://api.staging.vaultkit.app",
            Self::Production => "https://api.vaultkit.app",
        }
    }
}

/// Tunables for the engine. [`EngineConfig::default`] matches production
/// behavior; tests shrink the delays.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which backend deployment to talk to.
    pub environment: Environment,
    /// Acknowledgement delay for session-lock requests.
    pub settle_delay: Duration,
    /// Staleness window for lazily refreshed user data (plan, features).
    pub staleness_window_secs: u64,
    /// Broadcast capacity of the cross-context bus.
    pub bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            settle_delay: DEFAULT_SETTLE_DELAY,
            staleness_window_secs: DEFAULT_STALENESS_WINDOW_SECS,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}
