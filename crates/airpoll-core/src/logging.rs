//! Tracing subscriber setup for processes embedding the manager.
//!
//! The library itself only emits `tracing` events. Binaries and plugins call
//! [`init_logging`] once at startup to decide where those events go.

use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Environment variable that overrides the default filter, e.g.
/// `AIRPOLL_LOG=airpoll_core=debug`.
pub const LOG_ENV: &str = "AIRPOLL_LOG";

/// Logging mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// Install nothing; events are dropped.
    Silent,
    /// Compact stderr output at `info`.
    #[default]
    Development,
    /// Verbose output at `debug` with source locations.
    Debug,
}

/// Logging configuration error.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter in {LOG_ENV}: {0}")]
    InvalidFilter(String),
}

/// Install a global subscriber for `mode`.
///
/// Fails with [`LoggingError::TracingInit`] if a global subscriber is
/// already set, so calling this twice is harmless to check for.
///
/// ```rust,ignore
/// airpoll_core::logging::init_logging(LoggingMode::Development)?;
/// ```
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = env_filter("info")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = env_filter("debug")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Build the filter from [`LOG_ENV`], then `RUST_LOG`, then `default_level`.
fn env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter(e.to_string()))
}

/// Whether a global subscriber has been installed.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
