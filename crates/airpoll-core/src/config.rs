//! Device and manager configuration.
//!
//! [`DeviceConfig`] is the immutable per-device configuration the manager
//! works with. [`Config`] is the on-disk TOML form used to register a fleet
//! of devices at once:
//!
//! ```toml
//! [manager]
//! event_capacity = 100
//! re_registration = "replace"
//!
//! [[devices]]
//! id = "living_room"
//! address = "192.168.88.150"
//! poll_interval = 30
//!
//! [[devices]]
//! id = "bedroom"
//! address = "192.168.88.190"
//! protocol = "coap"
//! timeout = 8
//! max_retries = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use airpoll_types::{DEFAULT_PORT, Protocol};

use crate::error::{Error, Result};

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// Default number of consecutive failures before a device is reported disconnected.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay in seconds after a cycle that failed unexpectedly.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Configuration for a single device.
///
/// Immutable once handed to the manager; re-register the device to change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Network address (IP or hostname).
    pub address: String,
    /// Port of the device's service.
    pub port: u16,
    /// Transport protocol tag handed to the client factory.
    pub protocol: Protocol,
    /// Pause between the end of one poll cycle and the start of the next.
    pub poll_interval: Duration,
    /// Bound applied to every individual request.
    pub timeout: Duration,
    /// Consecutive failures after which the device is reported disconnected.
    pub max_retries: u32,
    /// Pause after a cycle that failed unexpectedly (rather than with a device error).
    pub retry_delay: Duration,
}

impl DeviceConfig {
    /// Create a config with default timing for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PORT,
            protocol: Protocol::default(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }

    /// The profile used for devices registered on demand by plugin callers.
    ///
    /// Shorter timeouts and a smaller retry budget keep plugin requests responsive.
    pub fn plugin_defaults(address: impl Into<String>) -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            timeout: Duration::from_secs(8),
            max_retries: 2,
            retry_delay: Duration::from_secs(3),
            ..Self::new(address)
        }
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the protocol tag.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the retry delay.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// List every problem with this config as `(field, message)` pairs.
    fn problems(&self) -> Vec<(&'static str, String)> {
        let mut problems = Vec::new();

        if self.address.trim().is_empty() {
            problems.push(("address", "device address cannot be empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            problems.push(("poll_interval", "poll interval must be > 0".to_string()));
        }
        if self.timeout.is_zero() {
            problems.push(("timeout", "timeout must be > 0".to_string()));
        }
        if self.max_retries < 1 {
            problems.push(("max_retries", "max retries must be >= 1".to_string()));
        }

        problems
    }

    /// Validate the config and return an error describing the first problem.
    ///
    /// Checks that:
    /// - `address` is not empty
    /// - `poll_interval` and `timeout` are > 0
    /// - `max_retries` is >= 1
    pub fn validate(&self) -> Result<()> {
        match self.problems().into_iter().next() {
            Some((field, message)) => Err(Error::invalid_config(format!("{field}: {message}"))),
            None => Ok(()),
        }
    }
}

/// What `add_device` does with an id that is already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReRegistration {
    /// Tear down the existing entry and start over with a fresh status.
    #[default]
    Replace,
    /// Refuse with [`Error::AlreadyRegistered`].
    Reject,
}

/// Configuration for the polling manager itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Behaviour when an already registered id is added again.
    pub re_registration: ReRegistration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            re_registration: ReRegistration::default(),
        }
    }
}

/// On-disk configuration: manager settings plus the devices to register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Manager settings.
    pub manager: ManagerConfig,
    /// Devices to poll.
    #[serde(default)]
    pub devices: Vec<DeviceEntryConfig>,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the default (empty) configuration.
    pub fn load_default() -> std::result::Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// This checks:
    /// - Event capacity is non-zero
    /// - Device ids are non-empty and unique
    /// - Each device's timing satisfies [`DeviceConfig::validate`]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.manager.event_capacity == 0 {
            errors.push(ValidationError {
                field: "manager.event_capacity".to_string(),
                message: "event capacity must be > 0".to_string(),
            });
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let prefix = format!("devices[{}]", i);
            errors.extend(device.validate(&prefix));

            if !device.id.is_empty() && !seen_ids.insert(device.id.as_str()) {
                errors.push(ValidationError {
                    field: format!("{}.id", prefix),
                    message: format!("duplicate device id '{}'", device.id),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// A device entry in the configuration file. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntryConfig {
    /// Caller-chosen device id.
    pub id: String,
    /// Network address.
    pub address: String,
    /// Port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Protocol tag.
    #[serde(default)]
    pub protocol: Protocol,
    /// Poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry delay in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

impl DeviceEntryConfig {
    /// Build the in-memory device config.
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::new(self.address.clone())
            .port(self.port)
            .protocol(self.protocol)
            .poll_interval(Duration::from_secs(self.poll_interval))
            .timeout(Duration::from_secs(self.timeout))
            .max_retries(self.max_retries)
            .retry_delay(Duration::from_secs(self.retry_delay))
    }

    /// Validate the entry.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.id", prefix),
                message: "device id cannot be empty".to_string(),
            });
        }

        errors.extend(
            self.device_config()
                .problems()
                .into_iter()
                .map(|(field, message)| ValidationError {
                    field: format!("{}.{}", prefix, field),
                    message,
                }),
        );

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `devices[0].timeout`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airpoll")
        .join("devices.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_defaults() {
        let config = DeviceConfig::new("192.168.1.10");
        assert_eq!(config.port, 5683);
        assert_eq!(config.protocol, Protocol::Coaps);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_plugin_defaults() {
        let config = DeviceConfig::plugin_defaults("10.0.0.2");
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.timeout, Duration::from_secs(8));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay, Duration::from_secs(3));
        assert_eq!(config.port, 5683);
    }

    #[test]
    fn test_device_config_validation() {
        let base = DeviceConfig::new("10.0.0.2");

        let err = base.clone().poll_interval(Duration::ZERO).validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval"));

        let err = base.clone().timeout(Duration::ZERO).validate().unwrap_err();
        assert!(err.to_string().contains("timeout"));

        let err = base.clone().max_retries(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        let err = DeviceConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_manager_config_default() {
        let config = ManagerConfig::default();
        assert_eq!(config.event_capacity, 100);
        assert_eq!(config.re_registration, ReRegistration::Replace);
    }

    #[test]
    fn test_device_entry_defaults() {
        let toml = r#"
            id = "d1"
            address = "192.168.88.150"
        "#;
        let entry: DeviceEntryConfig = toml::from_str(toml).unwrap();
        assert_eq!(entry.port, 5683);
        assert_eq!(entry.protocol, Protocol::Coaps);
        assert_eq!(entry.device_config(), DeviceConfig::new("192.168.88.150"));
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [manager]
            event_capacity = 16
            re_registration = "reject"

            [[devices]]
            id = "living_room"
            address = "192.168.88.150"
            poll_interval = 45

            [[devices]]
            id = "bedroom"
            address = "192.168.88.190"
            protocol = "coap"
            timeout = 8
            max_retries = 2
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.manager.event_capacity, 16);
        assert_eq!(config.manager.re_registration, ReRegistration::Reject);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].poll_interval, 45);
        assert_eq!(config.devices[1].protocol, Protocol::Coap);
        assert_eq!(
            config.devices[1].device_config().timeout,
            Duration::from_secs(8)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("devices.toml");

        let config = Config {
            manager: ManagerConfig::default(),
            devices: vec![DeviceEntryConfig {
                id: "d1".to_string(),
                address: "10.0.0.5".to_string(),
                port: 5684,
                protocol: Protocol::Coap,
                poll_interval: 20,
                timeout: 5,
                max_retries: 4,
                retry_delay: 2,
            }],
        };

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.devices, config.devices);
        assert_eq!(loaded.manager, config.manager);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/devices.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_config_validation_collects_all_errors() {
        let toml = r#"
            [[devices]]
            id = "d1"
            address = ""
            poll_interval = 0

            [[devices]]
            id = "d1"
            address = "10.0.0.1"
            max_retries = 0
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"devices[0].address"));
        assert!(fields.contains(&"devices[0].poll_interval"));
        assert!(fields.contains(&"devices[1].max_retries"));
        assert!(fields.contains(&"devices[1].id"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = ConfigError::Validation(vec![ValidationError {
            field: "devices[0].timeout".to_string(),
            message: "timeout must be > 0".to_string(),
        }]);
        let display = err.to_string();
        assert!(display.contains("validation failed"));
        assert!(display.contains("  - devices[0].timeout: timeout must be > 0"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("airpoll/devices.toml"));
    }
}
