//! Per-device request metrics.
//!
//! Every device entry carries a [`DeviceMetrics`] that counts session
//! establishments, status fetches and control pushes, along with how long
//! they took. [`crate::DevicePollingManager::metrics`] returns a
//! serializable [`DeviceMetricsSummary`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot of one request category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Total number of requests.
    pub count: u64,
    /// Requests that succeeded.
    pub success_count: u64,
    /// Requests that failed or timed out.
    pub failure_count: u64,
    /// Sum of all request durations.
    pub total_duration_ms: u64,
    /// Fastest request.
    pub min_duration_ms: Option<u64>,
    /// Slowest request.
    pub max_duration_ms: Option<u64>,
    /// Mean request duration.
    pub avg_duration_ms: Option<f64>,
}

/// Lock-free counters for one request category.
#[derive(Debug)]
pub struct AtomicOperationMetrics {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_ms: AtomicU64,
    min_duration_ms: AtomicU64,
    max_duration_ms: AtomicU64,
}

impl Default for AtomicOperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicOperationMetrics {
    /// Create empty counters.
    pub fn new() -> Self {
        Self {
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            min_duration_ms: AtomicU64::new(u64::MAX),
            max_duration_ms: AtomicU64::new(0),
        }
    }

    /// Record a successful request.
    pub fn record_success(&self, duration: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
    }

    /// Record a failed request.
    pub fn record_failure(&self, duration: Duration) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
    }

    /// Record the outcome of a request.
    pub fn record<T, E>(&self, outcome: &std::result::Result<T, E>, duration: Duration) {
        match outcome {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }
    }

    fn record_duration(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.total_duration_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_duration_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_duration_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Take a snapshot of the counters.
    pub fn snapshot(&self) -> OperationMetrics {
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let count = success_count + failure_count;
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);

        if count == 0 {
            return OperationMetrics::default();
        }

        OperationMetrics {
            count,
            success_count,
            failure_count,
            total_duration_ms,
            min_duration_ms: Some(self.min_duration_ms.load(Ordering::Relaxed)),
            max_duration_ms: Some(self.max_duration_ms.load(Ordering::Relaxed)),
            avg_duration_ms: Some(total_duration_ms as f64 / count as f64),
        }
    }
}

/// Request metrics for one device.
#[derive(Debug, Default)]
pub struct DeviceMetrics {
    /// Session construction plus initialization.
    pub session: AtomicOperationMetrics,
    /// Status fetches.
    pub fetch: AtomicOperationMetrics,
    /// Control pushes.
    pub push: AtomicOperationMetrics,
    /// Poll cycles that panicked.
    panics: AtomicU64,
}

impl DeviceMetrics {
    /// Create empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of poll cycles that panicked.
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    /// Summarize all counters.
    pub fn summary(&self) -> DeviceMetricsSummary {
        DeviceMetricsSummary {
            session: self.session.snapshot(),
            fetch: self.fetch.snapshot(),
            push: self.push.snapshot(),
            panics: self.panics(),
        }
    }
}

/// Serializable summary of [`DeviceMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetricsSummary {
    /// Session establishment metrics.
    pub session: OperationMetrics,
    /// Status fetch metrics.
    pub fetch: OperationMetrics,
    /// Control push metrics.
    pub push: OperationMetrics,
    /// Poll cycles that panicked.
    pub panics: u64,
}
