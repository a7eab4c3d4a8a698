//! Field-by-field restore of cached state at boot.

use crate::lock::LockState;
use crate::state::AppState;

impl AppState {
    /// Merges a decrypted cache entry into the live state.
    ///
    /// A populated cached field replaces the live one; an empty or absent
    /// cached field leaves the live value alone. A stale cache can fill
    /// blank slots but never erases data a context already initialized.
    pub(super) fn merge_boot(&mut self, cached: Self) {
        self.version = self.version.max(cached.version);
        if cached.user.is_some() {
            self.user = cached.user;
        }
        if !cached.addresses.is_empty() {
            self.addresses = cached.addresses;
        }
        if cached.event_id.is_some() {
            self.event_id = cached.event_id;
        }
        if cached.plan.is_some() {
            self.plan = cached.plan;
        }
        if cached.features.is_some() {
            self.features = cached.features;
        }
        if !cached.settings.is_empty() {
            self.settings = cached.settings;
        }
        if !matches!(cached.lock, LockState::None) {
            self.lock = cached.lock;
        }
        if !cached.items.is_empty() {
            self.items = cached.items;
        }
        if cached.alias_options.is_some() {
            self.alias_options = cached.alias_options;
        }
    }
}
