//! The device polling manager.
//!
//! [`DevicePollingManager`] owns the device registry, one scheduling unit
//! per device while running, and the session each device talks through.
//! It is an ordinary value: construct one, share it by cloning (clones are
//! handles to the same manager), and stop it when done.
//!
//! # Locking
//!
//! - The poller table lock is the manager-wide exclusive section. Add,
//!   remove, start and stop hold it for their whole duration.
//! - Each device has an I/O lock. Scheduled polls, forced polls and control
//!   pushes for one device take it, so they never overlap on the wire.
//! - The registry and status locks are only held for short, non-I/O sections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use airpoll_types::{Snapshot, StatusValue};

use crate::config::{Config, DeviceConfig, ManagerConfig, ReRegistration};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, PollEvent};
use crate::metrics::DeviceMetricsSummary;
use crate::observer::{self, StatusObserver};
use crate::poller;
use crate::registry::{DeviceEntry, Registry};
use crate::status::{DeviceInfo, DeviceStatus, PollerState};
use crate::tracker;
use crate::traits::{ClientFactory, DeviceClient};

struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared between the manager handle and its tasks.
pub(crate) struct Shared {
    factory: Arc<dyn ClientFactory>,
    registry: Registry,
    pollers: Mutex<HashMap<String, PollerHandle>>,
    running: AtomicBool,
    events: EventDispatcher,
    config: ManagerConfig,
}

impl Shared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fail if the entry was removed or the manager is stopped.
    pub(crate) fn check_usable(&self, entry: &DeviceEntry) -> Result<()> {
        if entry.is_retired() {
            return Err(Error::NotRegistered(entry.id.clone()));
        }
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        Ok(())
    }

    /// Get the device's session, recording a failure if one can't be established.
    pub(crate) async fn ensure_session(&self, entry: &DeviceEntry) -> Result<Arc<dyn DeviceClient>> {
        let session = entry
            .session
            .ensure(
                &entry.id,
                self.factory.as_ref(),
                &entry.config,
                &entry.metrics.session,
            )
            .await;

        if let Err(e) = &session {
            self.record_failure(entry, e).await;
        }
        session
    }

    /// Count a failure, drop the session and report exhaustion.
    pub(crate) async fn record_failure(&self, entry: &DeviceEntry, error: &Error) {
        let max_retries = entry.config.max_retries;
        let record = {
            let mut status = entry.status.write().await;
            tracker::record_failure(&mut status, max_retries, error)
        };

        warn!(
            "Device {} error ({}/{}): {}",
            entry.id, record.error_count, max_retries, error
        );
        self.events.send(PollEvent::PollFailed {
            device_id: entry.id.clone(),
            error: error.to_string(),
            error_count: record.error_count,
            kind: record.kind,
        });

        // Force the next cycle to start from a fresh session
        entry.session.discard(&entry.id, &entry.config).await;

        if record.exhausted {
            error!(
                "Device {} exceeded max retries, marking as disconnected",
                entry.id
            );
            if record.error_count == max_retries {
                self.events.send(PollEvent::Disconnected {
                    device_id: entry.id.clone(),
                    error_count: record.error_count,
                });
            }
        }
    }

    /// Commit a fresh snapshot and notify the observer.
    pub(crate) async fn commit_success(&self, entry: &DeviceEntry, snapshot: Snapshot) {
        let previous_failures = {
            let mut status = entry.status.write().await;
            tracker::record_success(&mut status, snapshot.clone(), OffsetDateTime::now_utc())
        };

        debug!(
            "Successfully polled device {}, got {} fields",
            entry.id,
            snapshot.len()
        );

        if previous_failures > 0 {
            info!(
                "Device {} responding again after {} failures",
                entry.id, previous_failures
            );
            self.events.send(PollEvent::Reconnected {
                device_id: entry.id.clone(),
                after_failures: previous_failures,
            });
        }
        self.events.send(PollEvent::StatusUpdated {
            device_id: entry.id.clone(),
            field_count: snapshot.len(),
        });

        if let Some(observer) = &entry.observer
            && !entry.is_retired()
        {
            observer::dispatch(observer.as_ref(), &entry.id, &snapshot);
        }
    }

    fn spawn_poller(
        self: &Arc<Self>,
        pollers: &mut HashMap<String, PollerHandle>,
        entry: Arc<DeviceEntry>,
    ) {
        if let Some(previous) = pollers.remove(&entry.id) {
            previous.cancel.cancel();
        }

        let cancel = entry.child_token();
        let id = entry.id.clone();
        entry.set_poller_state(PollerState::Running);
        let task = tokio::spawn(poller::run(Arc::clone(self), entry, cancel.clone()));
        pollers.insert(id.clone(), PollerHandle { cancel, task });
        info!("Started polling for device {}", id);
    }

    /// Tear an entry down: poller, in-flight I/O and session.
    async fn retire(&self, pollers: &mut HashMap<String, PollerHandle>, entry: &DeviceEntry) {
        entry.retire();

        if let Some(poller) = pollers.remove(&entry.id) {
            poller.cancel.cancel();
            if let Err(e) = poller.task.await {
                warn!("Poller for {} ended abnormally: {}", entry.id, e);
            }
        }

        // Wait out any forced poll or control push still on the wire
        let _io = entry.io_lock.lock().await;
        entry.session.discard(&entry.id, &entry.config).await;
        entry.set_poller_state(PollerState::Cancelled);
    }
}

/// Acknowledgement of an accepted control push.
#[derive(Debug)]
pub struct ControlAck {
    /// The device the values were pushed to.
    pub device_id: String,
    /// The keys that were set.
    pub keys: Vec<String>,
    /// The status refresh scheduled after the push.
    pub refresh: RefreshHandle,
}

/// A status refresh running in the background.
///
/// Dropping the handle does not cancel the refresh.
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<Result<Snapshot>>,
}

impl RefreshHandle {
    /// Wait for the refresh and return the snapshot it committed.
    ///
    /// A client panic during the refresh comes back as [`Error::Panicked`].
    pub async fn wait(self) -> Result<Snapshot> {
        self.task.await.map_err(|_| Error::Cancelled)?
    }

    /// Whether the refresh has completed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Supervises polling for a set of devices.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use airpoll_core::{DeviceConfig, DevicePollingManager, MockClientFactory};
///
/// #[tokio::main]
/// async fn main() -> airpoll_core::Result<()> {
///     let manager = DevicePollingManager::new(Arc::new(MockClientFactory::new()));
///     manager.add_device("living_room", DeviceConfig::new("192.168.88.150")).await?;
///     manager.start().await;
///
///     let snapshot = manager.force_poll("living_room").await?;
///     assert!(!snapshot.is_empty());
///
///     manager.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DevicePollingManager {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for DevicePollingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePollingManager")
            .field("running", &self.inner.is_running())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl DevicePollingManager {
    /// Create a manager with default configuration.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_config(factory, ManagerConfig::default())
    }

    /// Create a manager with full configuration.
    pub fn with_config(factory: Arc<dyn ClientFactory>, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                factory,
                registry: Registry::new(),
                pollers: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                events: EventDispatcher::new(config.event_capacity),
                config,
            }),
        }
    }

    /// Get the event dispatcher for subscribing to events.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Whether the manager is running.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Register a device.
    ///
    /// The device starts with a fresh status. If the manager is running its
    /// poller starts immediately, otherwise on the next [`start`](Self::start).
    /// An already registered id is replaced or rejected according to
    /// [`ManagerConfig::re_registration`].
    pub async fn add_device(&self, id: &str, config: DeviceConfig) -> Result<()> {
        self.add_entry(id, config, None, false).await.map(|_| ())
    }

    /// Register a device with an observer called after every successful poll.
    pub async fn add_device_with_observer(
        &self,
        id: &str,
        config: DeviceConfig,
        observer: impl StatusObserver + 'static,
    ) -> Result<()> {
        self.add_entry(id, config, Some(Arc::new(observer)), false)
            .await
            .map(|_| ())
    }

    /// Register a device unless `id` is already registered.
    ///
    /// The check and the insert happen under the manager-wide lock, so an
    /// existing device is never replaced. Returns whether the device was added.
    pub async fn add_device_if_absent(&self, id: &str, config: DeviceConfig) -> Result<bool> {
        self.add_entry(id, config, None, true).await
    }

    /// Register a device with an observer unless `id` is already registered.
    pub async fn add_device_with_observer_if_absent(
        &self,
        id: &str,
        config: DeviceConfig,
        observer: impl StatusObserver + 'static,
    ) -> Result<bool> {
        self.add_entry(id, config, Some(Arc::new(observer)), true)
            .await
    }

    /// Register every device in a configuration file.
    pub async fn add_configured(&self, config: &Config) -> Result<()> {
        config
            .validate()
            .map_err(|e| Error::invalid_config(e.to_string()))?;

        for device in &config.devices {
            self.add_device(&device.id, device.device_config()).await?;
        }
        Ok(())
    }

    async fn add_entry(
        &self,
        id: &str,
        config: DeviceConfig,
        observer: Option<Arc<dyn StatusObserver>>,
        keep_existing: bool,
    ) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(Error::invalid_config("device id cannot be empty"));
        }
        config.validate()?;

        let mut pollers = self.inner.pollers.lock().await;

        if let Some(existing) = self.inner.registry.get(id).await {
            if keep_existing {
                debug!("Device {} already managed", id);
                return Ok(false);
            }
            match self.inner.config.re_registration {
                ReRegistration::Reject => return Err(Error::AlreadyRegistered(id.to_string())),
                ReRegistration::Replace => {
                    info!("Device {} already registered, replacing it", id);
                    self.inner.retire(&mut pollers, &existing).await;
                }
            }
        }

        let entry = Arc::new(DeviceEntry::new(id, config, observer));
        self.inner.registry.insert(Arc::clone(&entry)).await;
        info!(
            "Added device {} at {}:{}",
            id, entry.config.address, entry.config.port
        );
        self.inner.events.send(PollEvent::DeviceAdded {
            device_id: id.to_string(),
        });

        if self.inner.is_running() {
            self.inner.spawn_poller(&mut pollers, entry);
        }
        Ok(true)
    }

    /// Remove a device, stopping its poller and closing its session.
    ///
    /// Once this returns, the device's observer is never called again.
    pub async fn remove_device(&self, id: &str) -> Result<()> {
        let mut pollers = self.inner.pollers.lock().await;
        let entry = self
            .inner
            .registry
            .remove(id)
            .await
            .ok_or_else(|| Error::NotRegistered(id.to_string()))?;

        self.inner.retire(&mut pollers, &entry).await;

        info!("Removed device {}", id);
        self.inner.events.send(PollEvent::DeviceRemoved {
            device_id: id.to_string(),
        });
        Ok(())
    }

    /// Start polling every registered device.
    ///
    /// Each device starts from a clean status. Does nothing if already running.
    pub async fn start(&self) {
        let mut pollers = self.inner.pollers.lock().await;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Polling manager is already running");
            return;
        }
        info!("Starting device polling manager");

        for entry in self.inner.registry.entries().await {
            *entry.status.write().await = DeviceStatus::default();
            self.inner.spawn_poller(&mut pollers, entry);
        }
    }

    /// Stop all pollers, wait for them to exit, then close every session.
    ///
    /// Registered devices are kept. Does nothing if not running.
    pub async fn stop(&self) {
        let mut pollers = self.inner.pollers.lock().await;
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!("Polling manager is not running");
            return;
        }
        info!("Stopping device polling manager");

        let tasks: Vec<_> = pollers
            .drain()
            .map(|(_, poller)| {
                poller.cancel.cancel();
                poller.task
            })
            .collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("Poller ended abnormally: {}", e);
            }
        }

        let entries = self.inner.registry.entries().await;
        join_all(entries.iter().map(|entry| async move {
            let _io = entry.io_lock.lock().await;
            entry.session.discard(&entry.id, &entry.config).await;
        }))
        .await;

        info!("Device polling manager stopped");
    }

    /// The cached snapshot for a device. No I/O.
    pub async fn get_cached_status(&self, id: &str) -> Option<Snapshot> {
        let entry = self.inner.registry.get(id).await?;
        let status = entry.status.read().await;
        status.snapshot.clone()
    }

    /// Poll a registered device now, outside its schedule.
    ///
    /// Runs after any poll or push already in progress for the device and
    /// does not move the device's own schedule.
    pub async fn force_poll(&self, id: &str) -> Result<Snapshot> {
        let entry = self.entry(id).await?;
        if !self.inner.is_running() {
            return Err(Error::NotRunning);
        }

        let cancel = entry.child_token();
        poller::poll_guarded(&self.inner, &entry, &cancel).await
    }

    /// Push control values to a device through its session.
    ///
    /// A session is created if none is open. On success a status refresh is
    /// started in the background; await [`ControlAck::refresh`] to wait for it.
    pub async fn set_control_values(&self, id: &str, values: Snapshot) -> Result<ControlAck> {
        let entry = self.entry(id).await?;
        if values.is_empty() {
            return Err(Error::invalid_config("no control values to set"));
        }
        let description = describe_values(&values);

        {
            let _io = entry.io_lock.lock().await;
            self.inner.check_usable(&entry)?;
            let client = self.inner.ensure_session(&entry).await?;

            let config = &entry.config;
            let operation = format!("set {}", description);
            let started = Instant::now();
            let push = async {
                match timeout(config.timeout, client.push_control_values(&values)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(operation.as_str(), config.timeout)),
                }
            };
            let outcome = poller::contain_panic(&entry, &operation, push).await;
            entry.metrics.push.record(&outcome, started.elapsed());

            if let Err(e) = outcome {
                // Panics are counted in metrics, not as device failures
                if !matches!(e, Error::Panicked { .. }) {
                    self.inner.record_failure(&entry, &e).await;
                }
                return Err(e);
            }
        }

        info!("Set {} on device {}", description, id);
        let keys: Vec<String> = values.into_keys().collect();
        self.inner.events.send(PollEvent::ControlApplied {
            device_id: id.to_string(),
            keys: keys.clone(),
        });

        Ok(ControlAck {
            device_id: id.to_string(),
            keys,
            refresh: self.spawn_refresh(entry),
        })
    }

    /// Push a single control value.
    pub async fn set_control_value(
        &self,
        id: &str,
        key: &str,
        value: impl Into<StatusValue>,
    ) -> Result<ControlAck> {
        let mut values = Snapshot::new();
        values.insert(key.to_string(), value.into());
        self.set_control_values(id, values).await
    }

    fn spawn_refresh(&self, entry: Arc<DeviceEntry>) -> RefreshHandle {
        let shared = Arc::clone(&self.inner);
        let cancel = entry.child_token();
        RefreshHandle {
            task: tokio::spawn(async move { poller::poll_guarded(&shared, &entry, &cancel).await }),
        }
    }

    /// Info for one device.
    pub async fn get_info(&self, id: &str) -> Option<DeviceInfo> {
        let entry = self.inner.registry.get(id).await?;
        Some(entry.info().await)
    }

    /// Info for every device, keyed by id.
    pub async fn list_info(&self) -> BTreeMap<String, DeviceInfo> {
        let mut infos = BTreeMap::new();
        for entry in self.inner.registry.entries().await {
            infos.insert(entry.id.clone(), entry.info().await);
        }
        infos
    }

    /// Request metrics for one device.
    pub async fn metrics(&self, id: &str) -> Option<DeviceMetricsSummary> {
        let entry = self.inner.registry.get(id).await?;
        Some(entry.metrics.summary())
    }

    /// Whether the device currently has an open session.
    pub async fn has_session(&self, id: &str) -> bool {
        match self.inner.registry.get(id).await {
            Some(entry) => entry.session.is_open().await,
            None => false,
        }
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.inner.registry.contains(id).await
    }

    /// Ids of all registered devices.
    pub async fn device_ids(&self) -> Vec<String> {
        self.inner.registry.ids().await
    }

    /// Number of registered devices.
    pub async fn device_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Number of scheduling units still alive.
    pub async fn active_pollers(&self) -> usize {
        let pollers = self.inner.pollers.lock().await;
        pollers.values().filter(|p| !p.task.is_finished()).count()
    }

    async fn entry(&self, id: &str) -> Result<Arc<DeviceEntry>> {
        self.inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotRegistered(id.to_string()))
    }
}

/// Render control values as `key=value, ...` for logs and errors.
fn describe_values(values: &Snapshot) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}
