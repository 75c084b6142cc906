//! Device registry: configuration, status and per-device resources.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::DeviceConfig;
use crate::metrics::DeviceMetrics;
use crate::observer::StatusObserver;
use crate::session::SessionStore;
use crate::status::{DeviceInfo, DeviceStatus, PollerState};

/// Everything the manager keeps for one registered device.
///
/// Entries are shared as `Arc`s so pollers and façade calls can work on a
/// device without holding the registry lock.
pub(crate) struct DeviceEntry {
    pub(crate) id: String,
    pub(crate) config: DeviceConfig,
    pub(crate) status: RwLock<DeviceStatus>,
    pub(crate) session: SessionStore,
    /// Serializes polls and control pushes for this device.
    pub(crate) io_lock: Mutex<()>,
    pub(crate) observer: Option<Arc<dyn StatusObserver>>,
    pub(crate) metrics: DeviceMetrics,
    /// Cancelled once the entry is removed or replaced.
    retired: CancellationToken,
    poller_state: AtomicU8,
}

impl std::fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("has_observer", &self.observer.is_some())
            .field("retired", &self.is_retired())
            .field("poller_state", &self.poller_state())
            .finish()
    }
}

impl DeviceEntry {
    pub(crate) fn new(
        id: &str,
        config: DeviceConfig,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            config,
            status: RwLock::new(DeviceStatus::default()),
            session: SessionStore::new(),
            io_lock: Mutex::new(()),
            observer,
            metrics: DeviceMetrics::new(),
            retired: CancellationToken::new(),
            poller_state: AtomicU8::new(PollerState::Idle as u8),
        }
    }

    /// Mark the entry as gone. Cancels its poller and any pending refresh.
    pub(crate) fn retire(&self) {
        self.retired.cancel();
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }

    /// A token cancelled when the entry is retired.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.retired.child_token()
    }

    pub(crate) fn poller_state(&self) -> PollerState {
        match self.poller_state.load(Ordering::Relaxed) {
            1 => PollerState::Running,
            2 => PollerState::Polling,
            3 => PollerState::Sleeping,
            4 => PollerState::Cancelled,
            _ => PollerState::Idle,
        }
    }

    pub(crate) fn set_poller_state(&self, state: PollerState) {
        self.poller_state.store(state as u8, Ordering::Relaxed);
    }

    pub(crate) async fn info(&self) -> DeviceInfo {
        let status = self.status.read().await;
        DeviceInfo::project(&self.id, &self.config, &status, self.poller_state())
    }
}

/// The id → entry table.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    devices: RwLock<HashMap<String, Arc<DeviceEntry>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn get(&self, id: &str) -> Option<Arc<DeviceEntry>> {
        self.devices.read().await.get(id).cloned()
    }

    /// Insert `entry`, returning any entry it replaced.
    pub(crate) async fn insert(&self, entry: Arc<DeviceEntry>) -> Option<Arc<DeviceEntry>> {
        self.devices.write().await.insert(entry.id.clone(), entry)
    }

    pub(crate) async fn remove(&self, id: &str) -> Option<Arc<DeviceEntry>> {
        self.devices.write().await.remove(id)
    }

    pub(crate) async fn contains(&self, id: &str) -> bool {
        self.devices.read().await.contains_key(id)
    }

    pub(crate) async fn entries(&self) -> Vec<Arc<DeviceEntry>> {
        self.devices.read().await.values().cloned().collect()
    }

    pub(crate) async fn ids(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    pub(crate) async fn len(&self) -> usize {
        self.devices.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> Arc<DeviceEntry> {
        Arc::new(DeviceEntry::new(id, DeviceConfig::new("10.0.0.1"), None))
    }

    #[tokio::test]
    async fn test_registry_insert_and_remove() {
        let registry = Registry::new();
        assert!(registry.insert(entry("d1")).await.is_none());
        assert!(registry.insert(entry("d2")).await.is_none());
        assert_eq!(registry.len().await, 2);

        let replaced = registry.insert(entry("d1")).await;
        assert!(replaced.is_some());
        assert_eq!(registry.len().await, 2);

        assert!(registry.remove("d1").await.is_some());
        assert!(!registry.contains("d1").await);
        assert!(registry.get("d2").await.is_some());
        assert_eq!(registry.ids().await, vec!["d2".to_string()]);
    }

    #[test]
    fn test_poller_state_roundtrip() {
        let entry = entry("d1");
        assert_eq!(entry.poller_state(), PollerState::Idle);
        for state in [
            PollerState::Running,
            PollerState::Polling,
            PollerState::Sleeping,
            PollerState::Cancelled,
            PollerState::Idle,
        ] {
            entry.set_poller_state(state);
            assert_eq!(entry.poller_state(), state);
        }
    }

    #[test]
    fn test_retire_cancels_children() {
        let entry = entry("d1");
        let child = entry.child_token();
        assert!(!entry.is_retired());
        entry.retire();
        assert!(entry.is_retired());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_info_of_fresh_entry() {
        let info = entry("d1").info().await;
        assert_eq!(info.device_id, "d1");
        assert!(!info.is_connected);
        assert!(!info.has_status);
        assert_eq!(info.poller_state, PollerState::Idle);
    }
}
