//! Error types for airpoll-core.
//!
//! This module defines all error types that can surface from the polling
//! manager and its device-client collaborator.
//!
//! # Failure Taxonomy
//!
//! | Error | Kind | Where it ends up |
//! |-------|------|------------------|
//! | [`Error::SessionFailed`] | session establishment | retry tracker, logged |
//! | [`Error::Timeout`] | request timeout | retry tracker, logged |
//! | [`Error::Transport`] | transport/protocol | retry tracker, logged |
//! | [`Error::Panicked`] | client panic | counted in metrics, logged |
//! | observer failure | callback | logged at the dispatch site only |
//!
//! Device errors never terminate a polling loop. They are counted per device,
//! the device's session is discarded so the next cycle starts fresh, and the
//! device is reported as disconnected. Only the façade entry points
//! ([`crate::DevicePollingManager::force_poll`],
//! [`crate::DevicePollingManager::set_control_values`], ...) hand errors
//! back to a caller, so a CLI or plugin can render a clean message.
//!
//! # Recommended Timeouts
//!
//! | Operation | Recommended Timeout | Notes |
//! |-----------|---------------------|-------|
//! | Session initialize | 8-15 seconds | Includes the encryption handshake |
//! | Status fetch | 8-15 seconds | Devices are slow when busy |
//! | Control push | 8-15 seconds | Acknowledged by the next status |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while supervising devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The device id is not registered with the manager.
    #[error("Device not registered: {0}")]
    NotRegistered(String),

    /// The device id is already registered and re-registration is rejected.
    #[error("Device already registered: {0}")]
    AlreadyRegistered(String),

    /// The operation requires a running manager.
    #[error("Polling manager is not running")]
    NotRunning,

    /// Constructing or initializing the device session failed.
    #[error("Client creation failed: {0}")]
    SessionFailed(Box<Error>),

    /// A request exceeded its configured bound.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The device client reported any other failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No cached status exists for the device.
    #[error("No status available for device {0}")]
    NoStatus(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The device client panicked during an operation.
    #[error("Device client panicked during {operation} for {device_id}")]
    Panicked {
        /// The device being polled or written to.
        device_id: String,
        /// The operation that panicked.
        operation: String,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Classification of device failures, as counted by the retry tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Construction or initialization of a session failed or timed out.
    SessionEstablishment,
    /// A fetch or set exceeded its timeout.
    Timeout,
    /// Any other error raised by the device client.
    Transport,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionEstablishment => write!(f, "session establishment"),
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
        }
    }
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Wrap an error raised while establishing a session.
    pub fn session_failed(cause: Error) -> Self {
        Self::SessionFailed(Box::new(cause))
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an error for a contained client panic.
    pub fn panicked(device_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Panicked {
            device_id: device_id.into(),
            operation: operation.into(),
        }
    }

    /// Whether this is a request timeout (not a session-establishment failure).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Classify a device failure.
    ///
    /// Returns `None` for errors that are not device failures
    /// (registration, lifecycle, configuration, cancellation).
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::SessionFailed(_) => Some(FailureKind::SessionEstablishment),
            Self::Timeout { .. } => Some(FailureKind::Timeout),
            Self::Transport(_) => Some(FailureKind::Transport),
            Self::NotRegistered(_)
            | Self::AlreadyRegistered(_)
            | Self::NotRunning
            | Self::NoStatus(_)
            | Self::InvalidConfig(_)
            | Self::Panicked { .. }
            | Self::Cancelled => None,
        }
    }
}

/// Result type alias using airpoll-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotRegistered("d1".to_string());
        assert_eq!(err.to_string(), "Device not registered: d1");

        let err = Error::NotRunning;
        assert_eq!(err.to_string(), "Polling manager is not running");

        let err = Error::timeout("fetch_status", Duration::from_secs(15));
        assert!(err.to_string().contains("fetch_status"));
        assert!(err.to_string().contains("15s"));

        let err = Error::NoStatus("d1".to_string());
        assert_eq!(err.to_string(), "No status available for device d1");
    }

    #[test]
    fn test_session_failed_wraps_cause() {
        let err = Error::session_failed(Error::timeout("initialize", Duration::from_secs(8)));
        let text = err.to_string();
        assert!(text.starts_with("Client creation failed"));
        assert!(text.contains("initialize"));
    }

    #[test]
    fn test_failure_kind() {
        assert_eq!(
            Error::session_failed(Error::transport("refused")).failure_kind(),
            Some(FailureKind::SessionEstablishment)
        );
        assert_eq!(
            Error::timeout("fetch_status", Duration::from_secs(1)).failure_kind(),
            Some(FailureKind::Timeout)
        );
        assert_eq!(
            Error::transport("bad frame").failure_kind(),
            Some(FailureKind::Transport)
        );
        assert_eq!(Error::NotRunning.failure_kind(), None);
        assert_eq!(Error::Cancelled.failure_kind(), None);
        assert_eq!(Error::panicked("d1", "poll").failure_kind(), None);
    }

    #[test]
    fn test_panicked_display() {
        let err = Error::panicked("d1", "set mode=M");
        assert_eq!(
            err.to_string(),
            "Device client panicked during set mode=M for d1"
        );
    }

    #[test]
    fn test_timed_out_initialize_is_not_a_request_timeout() {
        let err = Error::session_failed(Error::timeout("initialize", Duration::from_secs(1)));
        assert!(!err.is_timeout());
        assert_ne!(err.failure_kind(), Some(FailureKind::Timeout));
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
        assert_eq!(
            FailureKind::SessionEstablishment.to_string(),
            "session establishment"
        );
    }
}
