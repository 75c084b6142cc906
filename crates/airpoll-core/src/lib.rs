//! Per-device polling supervisor for networked air purifiers.
//!
//! Purifier firmware tends to hang when it is hit with repeated ad-hoc
//! connections. This crate keeps **at most one long-lived session per
//! device**, refreshes each device's status on its own schedule, and routes
//! every read and write through that session with bounded timeouts and
//! retry bookkeeping.
//!
//! The wire protocol is not implemented here. The manager is handed a
//! [`ClientFactory`] producing [`DeviceClient`] sessions and decides only
//! when and how often to use them.
//!
//! # Features
//!
//! - **Registry**: add, remove and inspect devices at any time
//! - **Session store**: lazily created sessions, discarded after any failure
//! - **Pollers**: one cancellable task per device, interval measured after each cycle
//! - **Retry tracking**: consecutive failures, last error, connectivity flag
//! - **Status cache**: stale-but-available snapshots plus observer callbacks
//! - **Control plane**: forced polls, control pushes, plugin-friendly JSON replies
//! - **Events and metrics**: broadcast [`PollEvent`]s and per-device request timings
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use airpoll_core::{BoxError, DeviceConfig, DevicePollingManager, MockClientFactory};
//! use airpoll_types::Snapshot;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = DevicePollingManager::new(Arc::new(MockClientFactory::new()));
//!
//!     let config = DeviceConfig::new("192.168.88.150").poll_interval(Duration::from_secs(30));
//!     manager
//!         .add_device_with_observer("living_room", config, |id: &str, status: &Snapshot| -> Result<(), BoxError> {
//!             println!("{id}: {} fields", status.len());
//!             Ok(())
//!         })
//!         .await?;
//!
//!     manager.start().await;
//!     manager.force_poll("living_room").await?;
//!     println!("{:?}", manager.get_info("living_room").await);
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod mock;
pub mod observer;
pub mod status;
pub mod tracker;
pub mod traits;

mod poller;
mod registry;
mod session;

pub use airpoll_types::types;

pub use config::{
    Config, ConfigError, DeviceConfig, DeviceEntryConfig, ManagerConfig, ReRegistration,
    ValidationError, default_config_path,
};
pub use control::{ControlPlane, ControlReport, InfoReport, StatusReport, reply};
pub use error::{Error, FailureKind, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, PollEvent};
pub use logging::{LoggingError, LoggingMode, init_logging};
pub use manager::{ControlAck, DevicePollingManager, RefreshHandle};
pub use metrics::{DeviceMetricsSummary, OperationMetrics};
pub use mock::{MockClient, MockClientFactory, MockPurifier, MockPurifierBuilder};
pub use observer::{BoxError, StatusObserver};
pub use status::{DeviceInfo, DeviceStatus, PollerState};
pub use traits::{ClientFactory, DeviceClient};
