//! Error types for value parsing in airpoll-types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers and tags.
///
/// This error type is transport-agnostic and does not include
/// session or network errors (those belong in airpoll-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The protocol tag is not one the manager knows about.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The value could not be interpreted.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using airpoll-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
