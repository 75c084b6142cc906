//! Control plane for plugin callers.
//!
//! A home-automation plugin only knows a device id and an address. The
//! [`ControlPlane`] registers devices on first use with
//! [`DeviceConfig::plugin_defaults`], reads status through the cache, and
//! pushes values through the manager. [`reply`] turns any result into the
//! JSON object the plugin consumes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use airpoll_types::{Protocol, Snapshot, StatusValue};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::manager::{DevicePollingManager, RefreshHandle};
use crate::observer::BoxError;
use crate::status::DeviceInfo;
use crate::traits::ClientFactory;

/// Status returned to a plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status_data: Snapshot,
    pub is_connected: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    pub error_count: u32,
}

/// Result of a control push.
#[derive(Debug, Serialize)]
pub struct ControlReport {
    pub device_id: String,
    pub message: String,
    /// Background status refresh triggered by the push.
    #[serde(skip)]
    pub refresh: RefreshHandle,
}

/// Device info with human-readable timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoReport {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub last_update_readable: Option<String>,
    pub last_success_readable: Option<String>,
}

/// Entry points for a plugin or CLI sitting on top of the manager.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    manager: DevicePollingManager,
}

impl ControlPlane {
    /// Create a control plane over a new manager.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_manager(DevicePollingManager::new(factory))
    }

    /// Create a control plane over an existing manager.
    pub fn with_manager(manager: DevicePollingManager) -> Self {
        Self { manager }
    }

    /// The underlying manager.
    pub fn manager(&self) -> &DevicePollingManager {
        &self.manager
    }

    /// Start the manager unless it is already running.
    pub async fn start(&self) {
        if !self.manager.is_running() {
            self.manager.start().await;
            info!("Polling manager started");
        }
    }

    /// Stop the manager if it is running.
    pub async fn shutdown(&self) {
        if self.manager.is_running() {
            self.manager.stop().await;
            info!("Polling manager stopped");
        }
    }

    /// Register `id` with the plugin profile unless it is already managed.
    pub async fn ensure_device_managed(
        &self,
        id: &str,
        address: &str,
        protocol: Protocol,
        port: u16,
    ) -> Result<()> {
        let config = DeviceConfig::plugin_defaults(address)
            .protocol(protocol)
            .port(port);
        let observer = |device_id: &str, snapshot: &Snapshot| -> std::result::Result<(), BoxError> {
            debug!("Status update for {}: {} fields", device_id, snapshot.len());
            Ok(())
        };

        self.manager
            .add_device_with_observer_if_absent(id, config, observer)
            .await
            .map(|_| ())
    }

    /// Status of a device, registering it first if needed.
    ///
    /// Polls the device when `force_poll` is set or nothing useful is cached.
    /// Fails with [`Error::NoStatus`] if the cache is still empty afterwards.
    pub async fn device_status(
        &self,
        id: &str,
        address: &str,
        protocol: Protocol,
        port: u16,
        force_poll: bool,
    ) -> Result<StatusReport> {
        self.ensure_device_managed(id, address, protocol, port)
            .await?;

        let cached = self.manager.get_cached_status(id).await;
        if force_poll || cached.is_none_or(|s| s.is_empty()) {
            debug!("Force polling device {}", id);
            if let Err(e) = self.manager.force_poll(id).await {
                debug!("Forced poll of {} failed: {}", id, e);
            }
        }

        let info = self
            .manager
            .get_info(id)
            .await
            .ok_or_else(|| Error::NotRegistered(id.to_string()))?;
        let status_data = self
            .manager
            .get_cached_status(id)
            .await
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::NoStatus(id.to_string()))?;

        Ok(StatusReport {
            status_data,
            is_connected: info.is_connected,
            last_update: info.last_update,
            error_count: info.error_count,
        })
    }

    /// Set one value, registering the device first if needed.
    ///
    /// `value` is coerced with [`StatusValue::parse_loose`].
    pub async fn set_device_value(
        &self,
        id: &str,
        address: &str,
        key: &str,
        value: &str,
        protocol: Protocol,
        port: u16,
    ) -> Result<ControlReport> {
        self.ensure_device_managed(id, address, protocol, port)
            .await?;

        let value = StatusValue::parse_loose(value);
        info!("Setting {}={} for {}", key, value, id);
        let ack = self.manager.set_control_value(id, key, value.clone()).await?;

        Ok(ControlReport {
            device_id: ack.device_id,
            message: format!("Set {}={}", key, value),
            refresh: ack.refresh,
        })
    }

    /// Info for a managed device.
    pub async fn device_info(&self, id: &str) -> Result<InfoReport> {
        let info = self
            .manager
            .get_info(id)
            .await
            .ok_or_else(|| Error::NotRegistered(id.to_string()))?;

        Ok(InfoReport {
            last_update_readable: info.last_update.and_then(readable),
            last_success_readable: info.last_success.and_then(readable),
            info,
        })
    }
}

fn readable(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc3339).ok()
}

/// Render a result as the JSON object the plugin expects.
///
/// Success merges `"success": true` into the serialized value; failure is
/// `{"error": "<message>"}`.
///
/// ```
/// use airpoll_core::{Error, control::reply};
///
/// let value = reply::<()>(Err(Error::NoStatus("d1".into())));
/// assert_eq!(value["error"], "No status available for device d1");
/// ```
pub fn reply<T: Serialize>(result: Result<T>) -> Value {
    let value = match result {
        Ok(value) => serde_json::to_value(&value),
        Err(e) => return json!({ "error": e.to_string() }),
    };

    match value {
        Ok(Value::Object(mut map)) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Ok(Value::Null) => json!({ "success": true }),
        Ok(other) => json!({ "success": true, "data": other }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_error() {
        let value = reply::<StatusReport>(Err(Error::NotRunning));
        assert_eq!(value, json!({ "error": "Polling manager is not running" }));
    }

    #[test]
    fn test_reply_success_object() {
        let mut status_data = Snapshot::new();
        status_data.insert("pwr".to_string(), StatusValue::from("1"));
        let report = StatusReport {
            status_data,
            is_connected: true,
            last_update: None,
            error_count: 0,
        };

        let value = reply(Ok(report));
        assert_eq!(value["success"], true);
        assert_eq!(value["status_data"]["pwr"], "1");
        assert_eq!(value["is_connected"], true);
        assert!(value["last_update"].is_null());
    }

    #[test]
    fn test_reply_unit_and_scalar() {
        assert_eq!(reply(Ok(())), json!({ "success": true }));
        assert_eq!(reply(Ok(3)), json!({ "success": true, "data": 3 }));
    }

    #[test]
    fn test_readable_timestamp() {
        assert_eq!(
            readable(OffsetDateTime::UNIX_EPOCH).as_deref(),
            Some("1970-01-01T00:00:00Z")
        );
    }
}
