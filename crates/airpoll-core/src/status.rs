//! Per-device status records and the read-only info projection.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use airpoll_types::{Protocol, Snapshot};

use crate::config::DeviceConfig;
use crate::error::FailureKind;

/// Mutable status of one device.
///
/// Only the device's poller and the façade operations acting on its behalf
/// write to this record, and they do so under the entry's status lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    /// When the cache was last refreshed.
    pub last_update: Option<OffsetDateTime>,
    /// When a fetch last succeeded.
    pub last_success: Option<OffsetDateTime>,
    /// The most recent snapshot. Replaced whole, never merged.
    pub snapshot: Option<Snapshot>,
    /// Whether the latest request succeeded.
    pub is_connected: bool,
    /// Consecutive failures since the last success.
    pub error_count: u32,
    /// Description of the most recent failure.
    pub last_error: Option<String>,
    /// Classification of the most recent failure.
    pub last_failure_kind: Option<FailureKind>,
}

impl DeviceStatus {
    /// Whether a snapshot is cached.
    pub fn has_status(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Lifecycle of a device's scheduling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// Registered but not scheduled (manager stopped).
    #[default]
    Idle,
    /// Scheduled, about to start a cycle.
    Running,
    /// Fetching status.
    Polling,
    /// Waiting for the next cycle.
    Sleeping,
    /// Cancelled by stop or removal.
    Cancelled,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Polling => "polling",
            Self::Sleeping => "sleeping",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Read-only view of one device.
///
/// Never exposes the session itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Poll interval in seconds.
    pub poll_interval: f64,
    pub is_connected: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_failure_kind: Option<FailureKind>,
    pub has_status: bool,
    pub poller_state: PollerState,
}

impl DeviceInfo {
    pub(crate) fn project(
        device_id: &str,
        config: &DeviceConfig,
        status: &DeviceStatus,
        poller_state: PollerState,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            address: config.address.clone(),
            port: config.port,
            protocol: config.protocol,
            poll_interval: config.poll_interval.as_secs_f64(),
            is_connected: status.is_connected,
            last_update: status.last_update,
            last_success: status.last_success,
            error_count: status.error_count,
            last_error: status.last_error.clone(),
            last_failure_kind: status.last_failure_kind,
            has_status: status.has_status(),
            poller_state,
        }
    }
}
