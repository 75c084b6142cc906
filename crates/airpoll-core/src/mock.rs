//! Mock device client for testing.
//!
//! This module provides an in-memory stand-in for the purifier client so the
//! manager can be exercised without any hardware on the network.
//!
//! A [`MockClientFactory`] keeps one [`MockPurifier`] per address. Every
//! session the factory constructs for that address talks to the same
//! purifier, so behaviour injected on the purifier survives session
//! recreation.
//!
//! # Features
//!
//! - **Failure injection**: fail everything, fail the next N requests, or fail one kind of request
//! - **Latency simulation**: delay initialize, fetch or push
//! - **Scripted payloads**: return composite, scalar or empty replies
//! - **Call counters**: constructions, fetches, pushes, closes and open sessions

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use airpoll_types::{Protocol, Snapshot, StatusPayload, StatusValue};

use crate::error::{Error, Result};
use crate::traits::{ClientFactory, DeviceClient};

/// A simulated air purifier.
///
/// Holds the state a real device would report, applies pushed control
/// values to it, and carries the failure and latency knobs used in tests.
pub struct MockPurifier {
    status: RwLock<Snapshot>,
    scripted: RwLock<Option<StatusPayload>>,
    pushed: RwLock<Vec<Snapshot>>,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
    fail_fetch: AtomicBool,
    fail_push: AtomicBool,
    fail_close: AtomicBool,
    panic_on_fetch: AtomicBool,
    panic_on_push: AtomicBool,
    /// Number of requests to fail before succeeding.
    remaining_failures: AtomicU32,
    initialize_latency_ms: AtomicU64,
    fetch_latency_ms: AtomicU64,
    push_latency_ms: AtomicU64,
    initialize_count: AtomicU32,
    fetch_count: AtomicU32,
    push_count: AtomicU32,
    close_count: AtomicU32,
    open_sessions: AtomicU32,
}

impl std::fmt::Debug for MockPurifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPurifier")
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .field("fetch_count", &self.fetch_count.load(Ordering::Relaxed))
            .field("open_sessions", &self.open_sessions.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockPurifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPurifier {
    /// Create a purifier reporting a typical idle status.
    pub fn new() -> Self {
        Self::with_status(Self::default_status())
    }

    /// Create a purifier reporting `status`.
    pub fn with_status(status: Snapshot) -> Self {
        Self {
            status: RwLock::new(status),
            scripted: RwLock::new(None),
            pushed: RwLock::new(Vec::new()),
            should_fail: AtomicBool::new(false),
            fail_message: RwLock::new("Mock failure".to_string()),
            fail_fetch: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            panic_on_fetch: AtomicBool::new(false),
            panic_on_push: AtomicBool::new(false),
            remaining_failures: AtomicU32::new(0),
            initialize_latency_ms: AtomicU64::new(0),
            fetch_latency_ms: AtomicU64::new(0),
            push_latency_ms: AtomicU64::new(0),
            initialize_count: AtomicU32::new(0),
            fetch_count: AtomicU32::new(0),
            push_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
            open_sessions: AtomicU32::new(0),
        }
    }

    fn default_status() -> Snapshot {
        let mut status = Snapshot::new();
        status.insert("pwr".to_string(), StatusValue::from("1"));
        status.insert("mode".to_string(), StatusValue::from("A"));
        status.insert("om".to_string(), StatusValue::from("a"));
        status.insert("pm25".to_string(), StatusValue::Int(7));
        status.insert("iaql".to_string(), StatusValue::Int(1));
        status.insert("cl".to_string(), StatusValue::Bool(false));
        status
    }

    /// The status the purifier currently reports.
    pub async fn status(&self) -> Snapshot {
        self.status.read().await.clone()
    }

    /// Replace the reported status.
    pub async fn set_status(&self, status: Snapshot) {
        *self.status.write().await = status;
    }

    /// Set one reported field.
    pub async fn set_field(&self, key: &str, value: impl Into<StatusValue>) {
        self.status.write().await.insert(key.to_string(), value.into());
    }

    /// Return `payload` from every fetch instead of the status mapping.
    ///
    /// Pass `None` to go back to reporting the status mapping.
    pub async fn script_payload(&self, payload: Option<StatusPayload>) {
        *self.scripted.write().await = payload;
    }

    /// Every set of control values pushed so far, oldest first.
    pub async fn pushed(&self) -> Vec<Snapshot> {
        self.pushed.read().await.clone()
    }

    /// Make every initialize, fetch and push fail.
    pub async fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    /// Make only fetches fail.
    pub fn set_fetch_fails(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::Relaxed);
    }

    /// Make only pushes fail.
    pub fn set_push_fails(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::Relaxed);
    }

    /// Make close report an error (the session is still considered closed).
    pub fn set_close_fails(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    /// Panic inside the next fetches until reset.
    pub fn set_panic_on_fetch(&self, panic: bool) {
        self.panic_on_fetch.store(panic, Ordering::Relaxed);
    }

    /// Panic inside the next pushes until reset.
    pub fn set_panic_on_push(&self, panic: bool) {
        self.panic_on_push.store(panic, Ordering::Relaxed);
    }

    /// Fail the next `count` requests, then succeed.
    ///
    /// Initialize, fetch and push all consume from the same budget.
    ///
    /// ```
    /// use airpoll_core::MockPurifier;
    ///
    /// let purifier = MockPurifier::new();
    /// // The first two session attempts fail, the third succeeds
    /// purifier.set_transient_failures(2);
    /// assert_eq!(purifier.remaining_failures(), 2);
    /// ```
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Transient failures left.
    pub fn remaining_failures(&self) -> u32 {
        self.remaining_failures.load(Ordering::Relaxed)
    }

    /// Delay each initialize by `latency`.
    pub fn set_initialize_latency(&self, latency: Duration) {
        self.initialize_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Delay each fetch by `latency`.
    pub fn set_fetch_latency(&self, latency: Duration) {
        self.fetch_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Delay each push by `latency`.
    pub fn set_push_latency(&self, latency: Duration) {
        self.push_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Successful and failed initialize calls.
    pub fn initialize_count(&self) -> u32 {
        self.initialize_count.load(Ordering::Relaxed)
    }

    /// Fetch calls, including failed ones.
    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Push calls, including failed ones.
    pub fn push_count(&self) -> u32 {
        self.push_count.load(Ordering::Relaxed)
    }

    /// Close calls on any session for this purifier.
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::Relaxed)
    }

    /// Sessions that were initialized and not yet closed.
    pub fn open_sessions(&self) -> u32 {
        self.open_sessions.load(Ordering::Relaxed)
    }

    async fn simulate_latency(latency_ms: &AtomicU64) {
        let latency = latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    /// Apply the shared failure knobs to one request.
    async fn check_failure(&self, operation_fails: bool) -> Result<()> {
        let consumed = self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();

        if consumed || operation_fails || self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::transport(self.fail_message.read().await.clone()));
        }
        Ok(())
    }
}

/// One session with a [`MockPurifier`].
#[derive(Debug)]
pub struct MockClient {
    purifier: Arc<MockPurifier>,
    open: AtomicBool,
}

impl MockClient {
    /// Create an uninitialized session with `purifier`.
    pub fn new(purifier: Arc<MockPurifier>) -> Self {
        Self {
            purifier,
            open: AtomicBool::new(false),
        }
    }

    /// Whether this session is initialized and not closed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeviceClient for MockClient {
    async fn initialize(&self) -> Result<()> {
        let purifier = &self.purifier;
        purifier.initialize_count.fetch_add(1, Ordering::Relaxed);
        MockPurifier::simulate_latency(&purifier.initialize_latency_ms).await;
        purifier.check_failure(false).await?;

        if !self.open.swap(true, Ordering::Relaxed) {
            purifier.open_sessions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn fetch_status(&self) -> Result<StatusPayload> {
        let purifier = &self.purifier;
        purifier.fetch_count.fetch_add(1, Ordering::Relaxed);
        MockPurifier::simulate_latency(&purifier.fetch_latency_ms).await;

        if purifier.panic_on_fetch.load(Ordering::Relaxed) {
            panic!("mock purifier panicked during fetch");
        }
        purifier
            .check_failure(purifier.fail_fetch.load(Ordering::Relaxed))
            .await?;

        if let Some(payload) = purifier.scripted.read().await.clone() {
            return Ok(payload);
        }
        Ok(StatusPayload::Mapping(purifier.status().await))
    }

    async fn push_control_values(&self, values: &Snapshot) -> Result<()> {
        let purifier = &self.purifier;
        purifier.push_count.fetch_add(1, Ordering::Relaxed);
        MockPurifier::simulate_latency(&purifier.push_latency_ms).await;

        if purifier.panic_on_push.load(Ordering::Relaxed) {
            panic!("mock purifier panicked during push");
        }
        purifier
            .check_failure(purifier.fail_push.load(Ordering::Relaxed))
            .await?;

        purifier.pushed.write().await.push(values.clone());
        purifier
            .status
            .write()
            .await
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let purifier = &self.purifier;
        purifier.close_count.fetch_add(1, Ordering::Relaxed);
        if self.open.swap(false, Ordering::Relaxed) {
            purifier.open_sessions.fetch_sub(1, Ordering::Relaxed);
        }

        if purifier.fail_close.load(Ordering::Relaxed) {
            return Err(Error::transport("mock close failure"));
        }
        Ok(())
    }
}

/// Builds [`MockClient`]s, one simulated purifier per address.
#[derive(Debug, Default)]
pub struct MockClientFactory {
    purifiers: RwLock<HashMap<String, Arc<MockPurifier>>>,
    construct_count: AtomicU32,
    construct_fails: AtomicBool,
    last_protocol: RwLock<Option<Protocol>>,
}

impl MockClientFactory {
    /// Create a factory with no purifiers; they are created on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// The purifier at `address`, created with default status if unknown.
    pub async fn device(&self, address: &str) -> Arc<MockPurifier> {
        let mut purifiers = self.purifiers.write().await;
        Arc::clone(
            purifiers
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(MockPurifier::new())),
        )
    }

    /// Place `purifier` at `address`, replacing any existing one.
    pub async fn insert(&self, address: &str, purifier: MockPurifier) -> Arc<MockPurifier> {
        let purifier = Arc::new(purifier);
        self.purifiers
            .write()
            .await
            .insert(address.to_string(), Arc::clone(&purifier));
        purifier
    }

    /// Make construction itself fail.
    pub fn set_construct_fails(&self, fail: bool) {
        self.construct_fails.store(fail, Ordering::Relaxed);
    }

    /// Number of construct calls.
    pub fn construct_count(&self) -> u32 {
        self.construct_count.load(Ordering::Relaxed)
    }

    /// Protocol passed to the latest construct call.
    pub async fn last_protocol(&self) -> Option<Protocol> {
        *self.last_protocol.read().await
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn construct(
        &self,
        address: &str,
        _port: u16,
        protocol: Protocol,
    ) -> Result<Box<dyn DeviceClient>> {
        self.construct_count.fetch_add(1, Ordering::Relaxed);
        *self.last_protocol.write().await = Some(protocol);

        if self.construct_fails.load(Ordering::Relaxed) {
            return Err(Error::transport(format!("cannot reach {}", address)));
        }

        let purifier = self.device(address).await;
        Ok(Box::new(MockClient::new(purifier)))
    }
}

/// Builder for mock purifiers with custom settings.
#[derive(Debug, Default)]
pub struct MockPurifierBuilder {
    status: Option<Snapshot>,
    fields: Vec<(String, StatusValue)>,
    transient_failures: u32,
    fetch_latency: Option<Duration>,
    scripted: Option<StatusPayload>,
}

impl MockPurifierBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report exactly `status` instead of the default idle status.
    #[must_use]
    pub fn status(mut self, status: Snapshot) -> Self {
        self.status = Some(status);
        self
    }

    /// Set one reported field.
    #[must_use]
    pub fn field(mut self, key: &str, value: impl Into<StatusValue>) -> Self {
        self.fields.push((key.to_string(), value.into()));
        self
    }

    /// Fail the first `count` requests.
    #[must_use]
    pub fn transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Delay each fetch.
    #[must_use]
    pub fn fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = Some(latency);
        self
    }

    /// Return `payload` from every fetch.
    #[must_use]
    pub fn payload(mut self, payload: StatusPayload) -> Self {
        self.scripted = Some(payload);
        self
    }

    /// Build the purifier.
    #[must_use]
    pub fn build(self) -> MockPurifier {
        let mut status = self.status.unwrap_or_else(MockPurifier::default_status);
        status.extend(self.fields);

        let mut purifier = MockPurifier::with_status(status);
        purifier.set_transient_failures(self.transient_failures);
        if let Some(latency) = self.fetch_latency {
            purifier.set_fetch_latency(latency);
        }
        *purifier.scripted.get_mut() = self.scripted;
        purifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(factory: &MockClientFactory, address: &str) -> Box<dyn DeviceClient> {
        let client = factory.construct(address, 5683, Protocol::Coaps).await.unwrap();
        client.initialize().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_session_lifecycle_counters() {
        let factory = MockClientFactory::new();
        let client = open(&factory, "10.0.0.1").await;
        let purifier = factory.device("10.0.0.1").await;

        assert_eq!(factory.construct_count(), 1);
        assert_eq!(purifier.open_sessions(), 1);

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(purifier.open_sessions(), 0);
        assert_eq!(purifier.close_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_returns_status_mapping() {
        let factory = MockClientFactory::new();
        let client = open(&factory, "10.0.0.1").await;

        let snapshot = client.fetch_status().await.unwrap().normalize();
        assert_eq!(snapshot.get("pwr"), Some(&StatusValue::from("1")));
        assert_eq!(factory.last_protocol().await, Some(Protocol::Coaps));
    }

    #[tokio::test]
    async fn test_push_updates_reported_status() {
        let factory = MockClientFactory::new();
        let client = open(&factory, "10.0.0.1").await;
        let purifier = factory.device("10.0.0.1").await;

        let mut values = Snapshot::new();
        values.insert("mode".to_string(), StatusValue::from("S"));
        client.push_control_values(&values).await.unwrap();

        assert_eq!(purifier.status().await.get("mode"), Some(&StatusValue::from("S")));
        assert_eq!(purifier.pushed().await, vec![values]);
    }

    #[tokio::test]
    async fn test_transient_failures() {
        let factory = MockClientFactory::new();
        let purifier = factory.device("10.0.0.1").await;
        purifier.set_transient_failures(2);

        let client = factory.construct("10.0.0.1", 5683, Protocol::Coap).await.unwrap();
        assert!(client.initialize().await.is_err());
        assert!(client.initialize().await.is_err());
        assert!(client.initialize().await.is_ok());
        assert_eq!(purifier.remaining_failures(), 0);
        assert_eq!(purifier.initialize_count(), 3);
    }

    #[tokio::test]
    async fn test_should_fail_with_message() {
        let factory = MockClientFactory::new();
        let client = open(&factory, "10.0.0.1").await;
        let purifier = factory.device("10.0.0.1").await;
        purifier.set_should_fail(true, Some("device hung")).await;

        let err = client.fetch_status().await.unwrap_err();
        assert_eq!(err.to_string(), "Transport error: device hung");
    }

    #[tokio::test]
    async fn test_per_operation_failures() {
        let factory = MockClientFactory::new();
        let client = open(&factory, "10.0.0.1").await;
        let purifier = factory.device("10.0.0.1").await;

        purifier.set_push_fails(true);
        assert!(client.push_control_values(&Snapshot::new()).await.is_err());
        assert!(client.fetch_status().await.is_ok());

        purifier.set_push_fails(false);
        purifier.set_fetch_fails(true);
        assert!(client.fetch_status().await.is_err());
        assert!(client.push_control_values(&Snapshot::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_construct_failure() {
        let factory = MockClientFactory::new();
        factory.set_construct_fails(true);
        assert!(factory.construct("10.0.0.1", 5683, Protocol::Coaps).await.is_err());
        assert_eq!(factory.construct_count(), 1);
    }

    #[tokio::test]
    async fn test_builder() {
        let factory = MockClientFactory::new();
        let purifier = factory
            .insert(
                "10.0.0.2",
                MockPurifierBuilder::new()
                    .field("pm25", 42)
                    .payload(StatusPayload::Composite(vec![StatusPayload::Empty]))
                    .build(),
            )
            .await;
        assert_eq!(purifier.status().await.get("pm25"), Some(&StatusValue::Int(42)));

        let client = open(&factory, "10.0.0.2").await;
        let payload = client.fetch_status().await.unwrap();
        assert_eq!(payload, StatusPayload::Composite(vec![StatusPayload::Empty]));
    }
}
