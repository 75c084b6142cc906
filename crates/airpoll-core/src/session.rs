//! The per-device session slot.
//!
//! Each registered device owns one [`SessionStore`], which holds at most one
//! initialized [`DeviceClient`]. A session is only installed after both
//! construction and initialization succeeded within the device timeout.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::metrics::AtomicOperationMetrics;
use crate::traits::{ClientFactory, DeviceClient};

/// Holds the live session for one device, if any.
#[derive(Default)]
pub(crate) struct SessionStore {
    slot: Mutex<Option<Arc<dyn DeviceClient>>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = self.slot.try_lock().map(|s| s.is_some()).ok();
        f.debug_struct("SessionStore").field("open", &open).finish()
    }
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the existing session or establish a new one.
    ///
    /// Failures come back as [`Error::SessionFailed`] and leave the slot
    /// empty. Recording the failure is up to the caller.
    pub(crate) async fn ensure(
        &self,
        device_id: &str,
        factory: &dyn ClientFactory,
        config: &DeviceConfig,
        metrics: &AtomicOperationMetrics,
    ) -> Result<Arc<dyn DeviceClient>> {
        let mut slot = self.slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }

        debug!("Creating new client for device {}", device_id);
        let started = Instant::now();
        let outcome = establish(device_id, factory, config).await;
        metrics.record(&outcome, started.elapsed());

        match outcome {
            Ok(client) => {
                debug!("Successfully created client for device {}", device_id);
                *slot = Some(Arc::clone(&client));
                Ok(client)
            }
            Err(e) => {
                warn!("Failed to create client for device {}: {}", device_id, e);
                Err(Error::session_failed(e))
            }
        }
    }

    /// Close and drop the session, if any.
    ///
    /// Close errors are logged and otherwise ignored.
    pub(crate) async fn discard(&self, device_id: &str, config: &DeviceConfig) {
        let client = self.slot.lock().await.take();
        if let Some(client) = client {
            let guard = CloseGuard::new(device_id, config, Arc::clone(&client));
            close_quietly(device_id, client.as_ref(), config).await;
            guard.defuse();
        }
    }

    /// Whether a session is currently installed.
    pub(crate) async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

/// Construct and initialize a client, each step bounded by the device timeout.
///
/// A client that was constructed but never handed back is closed, even when
/// this future is dropped mid-initialize.
async fn establish(
    device_id: &str,
    factory: &dyn ClientFactory,
    config: &DeviceConfig,
) -> Result<Arc<dyn DeviceClient>> {
    let client: Arc<dyn DeviceClient> = timeout(
        config.timeout,
        factory.construct(&config.address, config.port, config.protocol),
    )
    .await
    .map_err(|_| Error::timeout("construct", config.timeout))??
    .into();
    let guard = CloseGuard::new(device_id, config, Arc::clone(&client));

    let initialized = match timeout(config.timeout, client.initialize()).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout("initialize", config.timeout)),
    };

    if let Err(e) = initialized {
        close_quietly(device_id, client.as_ref(), config).await;
        guard.defuse();
        return Err(e);
    }

    guard.defuse();
    Ok(client)
}

/// Closes a client on drop unless defused.
///
/// Covers the await points where a cancelled caller would otherwise leave a
/// half-open session on the device.
struct CloseGuard {
    device_id: String,
    config: DeviceConfig,
    client: Option<Arc<dyn DeviceClient>>,
}

impl CloseGuard {
    fn new(device_id: &str, config: &DeviceConfig, client: Arc<dyn DeviceClient>) -> Self {
        Self {
            device_id: device_id.to_string(),
            config: config.clone(),
            client: Some(client),
        }
    }

    fn defuse(mut self) {
        self.client = None;
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if let Ok(handle) = Handle::try_current() {
            let device_id = std::mem::take(&mut self.device_id);
            let config = self.config.clone();
            debug!("Closing abandoned client for device {}", device_id);
            handle.spawn(async move {
                close_quietly(&device_id, client.as_ref(), &config).await;
            });
        } else {
            warn!(
                "No tokio runtime available to close client for device {}",
                self.device_id
            );
        }
    }
}

async fn close_quietly(device_id: &str, client: &dyn DeviceClient, config: &DeviceConfig) {
    match timeout(config.timeout, client.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Error shutting down client for {}: {}", device_id, e),
        Err(_) => warn!(
            "Timed out shutting down client for {} after {:?}",
            device_id, config.timeout
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClientFactory;
    use std::time::Duration;

    const ADDR: &str = "10.0.0.9";

    fn config() -> DeviceConfig {
        DeviceConfig::new(ADDR).timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_ensure_reuses_session() {
        let factory = MockClientFactory::new();
        let store = SessionStore::new();
        let metrics = AtomicOperationMetrics::new();

        store.ensure("d1", &factory, &config(), &metrics).await.unwrap();
        store.ensure("d1", &factory, &config(), &metrics).await.unwrap();

        assert!(store.is_open().await);
        assert_eq!(factory.construct_count(), 1);
        assert_eq!(metrics.snapshot().success_count, 1);
    }

    #[tokio::test]
    async fn test_failed_initialize_stores_nothing() {
        let factory = MockClientFactory::new();
        let device = factory.device(ADDR).await;
        device.set_should_fail(true, Some("handshake rejected")).await;

        let store = SessionStore::new();
        let metrics = AtomicOperationMetrics::new();
        let err = store.ensure("d1", &factory, &config(), &metrics).await.err().expect("expected ensure to fail");

        assert!(matches!(err, Error::SessionFailed(_)));
        assert!(err.to_string().contains("handshake rejected"));
        assert!(!store.is_open().await);
        // The half-open client was closed
        assert_eq!(device.close_count(), 1);
        assert_eq!(metrics.snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_timeout_stores_nothing() {
        let factory = MockClientFactory::new();
        let device = factory.device(ADDR).await;
        device.set_initialize_latency(Duration::from_secs(10));

        let store = SessionStore::new();
        let metrics = AtomicOperationMetrics::new();
        let err = store.ensure("d1", &factory, &config(), &metrics).await.err().expect("expected ensure to fail");

        match err {
            Error::SessionFailed(cause) => assert!(cause.is_timeout()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.is_open().await);
        assert_eq!(device.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_ensure_closes_constructed_client() {
        let factory = MockClientFactory::new();
        let device = factory.device(ADDR).await;
        device.set_initialize_latency(Duration::from_secs(10));

        let store = SessionStore::new();
        let metrics = AtomicOperationMetrics::new();
        let config = DeviceConfig::new(ADDR).timeout(Duration::from_secs(20));

        tokio::select! {
            _ = store.ensure("d1", &factory, &config, &metrics) => panic!("initialize should still be pending"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        // Let the background close run
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(factory.construct_count(), 1);
        assert_eq!(device.close_count(), 1);
        assert!(!store.is_open().await);
    }

    #[tokio::test]
    async fn test_construct_failure() {
        let factory = MockClientFactory::new();
        factory.set_construct_fails(true);

        let store = SessionStore::new();
        let metrics = AtomicOperationMetrics::new();
        let err = store.ensure("d1", &factory, &config(), &metrics).await.err().expect("expected ensure to fail");
        assert!(matches!(err, Error::SessionFailed(_)));
        assert!(!store.is_open().await);
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let factory = MockClientFactory::new();
        let device = factory.device(ADDR).await;
        let store = SessionStore::new();
        let metrics = AtomicOperationMetrics::new();

        store.ensure("d1", &factory, &config(), &metrics).await.unwrap();
        assert_eq!(device.open_sessions(), 1);

        store.discard("d1", &config()).await;
        store.discard("d1", &config()).await;

        assert!(!store.is_open().await);
        assert_eq!(device.open_sessions(), 0);
        assert_eq!(device.close_count(), 1);
    }

    #[tokio::test]
    async fn test_discard_swallows_close_errors() {
        let factory = MockClientFactory::new();
        let device = factory.device(ADDR).await;
        let store = SessionStore::new();
        let metrics = AtomicOperationMetrics::new();

        store.ensure("d1", &factory, &config(), &metrics).await.unwrap();
        device.set_close_fails(true);
        store.discard("d1", &config()).await;

        assert!(!store.is_open().await);
    }
}
