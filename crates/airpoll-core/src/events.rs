//! Manager event stream.
//!
//! Besides the per-device observer callback, the manager broadcasts a
//! [`PollEvent`] for every registration change, status update and failure.
//! Subscribers that fall behind lose the oldest events; the manager never
//! blocks on a slow subscriber.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::FailureKind;

/// Events emitted by the polling manager.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum PollEvent {
    /// A device was registered.
    DeviceAdded { device_id: String },
    /// A device was removed.
    DeviceRemoved { device_id: String },
    /// A poll succeeded and the cached snapshot was replaced.
    StatusUpdated {
        device_id: String,
        field_count: usize,
    },
    /// A device request failed.
    PollFailed {
        device_id: String,
        error: String,
        error_count: u32,
        kind: FailureKind,
    },
    /// The device's consecutive failures reached its retry budget.
    Disconnected { device_id: String, error_count: u32 },
    /// A device answered again after one or more failures.
    Reconnected {
        device_id: String,
        after_failures: u32,
    },
    /// Control values were accepted by a device.
    ControlApplied {
        device_id: String,
        keys: Vec<String>,
    },
}

impl PollEvent {
    /// The device this event concerns.
    pub fn device_id(&self) -> &str {
        match self {
            Self::DeviceAdded { device_id }
            | Self::DeviceRemoved { device_id }
            | Self::StatusUpdated { device_id, .. }
            | Self::PollFailed { device_id, .. }
            | Self::Disconnected { device_id, .. }
            | Self::Reconnected { device_id, .. }
            | Self::ControlApplied { device_id, .. } => device_id,
        }
    }
}

/// Sender for manager events.
pub type EventSender = broadcast::Sender<PollEvent>;

/// Receiver for manager events.
pub type EventReceiver = broadcast::Receiver<PollEvent>;

/// Broadcasts events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a dispatcher whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: PollEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
