//! Per-URL markup snapshots for back/forward restoration.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::live::storage::{LocalStore, StorageBackend};

const KEY_PREFIX: &str = "soli-live:snapshot:";

/// Component markup captured when a page was left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub components: IndexMap<String, String>,
}

impl Snapshot {
    pub fn new(components: IndexMap<String, String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            components,
        }
    }
}

/// Navigation timing entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationType {
    Navigate,
    Reload,
    BackForward,
    Prerender,
}

impl NavigationType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "navigate" => Some(Self::Navigate),
            "reload" => Some(Self::Reload),
            "back_forward" => Some(Self::BackForward),
            "prerender" => Some(Self::Prerender),
            _ => None,
        }
    }
}

/// Legacy navigation code for back/forward.
pub const LEGACY_BACK_FORWARD: u8 = 2;

/// What the host knows about how the page was reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigationSignals {
    /// Page came out of the back/forward cache.
    pub persisted: Option<bool>,
    pub timing_type: Option<NavigationType>,
    pub legacy_type: Option<u8>,
}

impl NavigationSignals {
    pub fn back_forward() -> Self {
        Self {
            timing_type: Some(NavigationType::BackForward),
            ..Self::default()
        }
    }

    /// The first available signal decides.
    pub fn is_history_traversal(&self) -> bool {
        if let Some(persisted) = self.persisted {
            return persisted;
        }
        if let Some(kind) = self.timing_type {
            return kind == NavigationType::BackForward;
        }
        self.legacy_type == Some(LEGACY_BACK_FORWARD)
    }
}

/// Saves and loads snapshots keyed by page URL.
#[derive(Clone)]
pub struct SnapshotManager {
    storage: Arc<dyn StorageBackend>,
}

impl SnapshotManager {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    fn store(&self) -> LocalStore<'_> {
        LocalStore::with_prefix(self.storage.as_ref(), KEY_PREFIX)
    }

    /// Store `components` for `url`. Failures are logged and dropped.
    pub fn save(&self, url: &str, components: IndexMap<String, String>) {
        let snapshot = Snapshot::new(components);
        match self.store().save(url, &snapshot) {
            Ok(()) => debug!(url, count = snapshot.components.len(), "snapshot saved"),
            Err(e) => warn!(url, "failed to save snapshot: {}", e),
        }
    }

    pub fn load(&self, url: &str) -> Option<Snapshot> {
        self.store().load(url)
    }

    /// Snapshot for `url`, but only when the page was reached by history
    /// traversal.
    pub fn restorable(&self, url: &str, signals: &NavigationSignals) -> Option<Snapshot> {
        if !signals.is_history_traversal() {
            return None;
        }
        self.load(url)
    }

    pub fn clear(&self, url: &str) {
        if let Err(e) = self.store().remove(url) {
            warn!(url, "failed to clear snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn manager() -> SnapshotManager {
        SnapshotManager::new(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_first_available_signal_wins() {
        let mut signals = NavigationSignals {
            persisted: Some(false),
            timing_type: Some(NavigationType::BackForward),
            legacy_type: Some(LEGACY_BACK_FORWARD),
        };
        assert!(!signals.is_history_traversal());

        signals.persisted = None;
        assert!(signals.is_history_traversal());

        signals.timing_type = Some(NavigationType::Reload);
        assert!(!signals.is_history_traversal());

        signals.timing_type = None;
        assert!(signals.is_history_traversal());
        assert!(!NavigationSignals::default().is_history_traversal());
    }

    #[test]
    fn test_snapshot_only_restorable_on_traversal() {
        let manager = manager();
        let mut components = IndexMap::new();
        components.insert("c1".to_string(), "<div soli-id=\"c1\">3</div>".to_string());
        manager.save("/counter", components.clone());

        let fresh = NavigationSignals {
            timing_type: Some(NavigationType::Navigate),
            ..NavigationSignals::default()
        };
        assert_eq!(manager.restorable("/counter", &fresh), None);

        let snapshot = manager
            .restorable("/counter", &NavigationSignals::back_forward())
            .unwrap();
        assert_eq!(snapshot.components, components);
        assert!(snapshot.timestamp > 0);
        assert_eq!(manager.load("/other"), None);

        manager.clear("/counter");
        assert_eq!(manager.load("/counter"), None);
    }

    #[test]
    fn test_navigation_type_parse() {
        assert_eq!(NavigationType::parse("back_forward"), Some(NavigationType::BackForward));
        assert_eq!(NavigationType::parse("bogus"), None);
    }
}
