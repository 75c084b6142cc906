//! Core types for purifier status data.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Key under which a non-mapping status payload is stored after normalization.
pub const RAW_STATUS_KEY: &str = "raw_status";

/// Default CoAP port used by the purifiers.
pub const DEFAULT_PORT: u16 = 5683;

/// A status snapshot: unique string keys mapped to primitive values.
///
/// Ordered so that serialized snapshots and log output are stable.
pub type Snapshot = BTreeMap<String, StatusValue>;

/// A single primitive value reported by (or pushed to) a device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum StatusValue {
    /// Explicit absence of a value.
    Null,
    /// Boolean flag (power, child lock, ...).
    Bool(bool),
    /// Integer value (fan speed, PM2.5, filter hours, ...).
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Free-form text (mode names, firmware strings, ...).
    Text(String),
}

impl StatusValue {
    /// Interpret a command-line style value.
    ///
    /// `true`/`false` (any case) become booleans, plain digit strings become
    /// integers, digit strings with dots that parse as a float become floats,
    /// and anything else is kept as text.
    ///
    /// # Examples
    ///
    /// ```
    /// use airpoll_types::StatusValue;
    ///
    /// assert_eq!(StatusValue::parse_loose("TRUE"), StatusValue::Bool(true));
    /// assert_eq!(StatusValue::parse_loose("3"), StatusValue::Int(3));
    /// assert_eq!(StatusValue::parse_loose("1.5"), StatusValue::Float(1.5));
    /// assert_eq!(StatusValue::parse_loose("1.2.3"), StatusValue::Text("1.2.3".into()));
    /// assert_eq!(StatusValue::parse_loose("auto"), StatusValue::Text("auto".into()));
    /// ```
    #[must_use]
    pub fn parse_loose(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower == "true" {
            return StatusValue::Bool(true);
        }
        if lower == "false" {
            return StatusValue::Bool(false);
        }

        if is_all_digits(raw) {
            return match raw.parse::<i64>() {
                Ok(n) => StatusValue::Int(n),
                // Too large for i64; still numeric
                Err(_) => raw
                    .parse::<f64>()
                    .map(StatusValue::Float)
                    .unwrap_or_else(|_| StatusValue::Text(raw.to_string())),
            };
        }

        if is_all_digits(&raw.replace('.', ""))
            && let Ok(f) = raw.parse::<f64>()
        {
            return StatusValue::Float(f);
        }

        StatusValue::Text(raw.to_string())
    }

    /// Returns `true` for [`StatusValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, StatusValue::Null)
    }

    /// Returns the boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StatusValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StatusValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatusValue::Float(f) => Some(*f),
            StatusValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StatusValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Null => write!(f, "null"),
            StatusValue::Bool(b) => write!(f, "{}", b),
            StatusValue::Int(n) => write!(f, "{}", n),
            StatusValue::Float(x) => write!(f, "{}", x),
            StatusValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for StatusValue {
    fn from(value: bool) -> Self {
        StatusValue::Bool(value)
    }
}

impl From<i64> for StatusValue {
    fn from(value: i64) -> Self {
        StatusValue::Int(value)
    }
}

impl From<i32> for StatusValue {
    fn from(value: i32) -> Self {
        StatusValue::Int(i64::from(value))
    }
}

impl From<u32> for StatusValue {
    fn from(value: u32) -> Self {
        StatusValue::Int(i64::from(value))
    }
}

impl From<f64> for StatusValue {
    fn from(value: f64) -> Self {
        StatusValue::Float(value)
    }
}

impl From<&str> for StatusValue {
    fn from(value: &str) -> Self {
        StatusValue::Text(value.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        StatusValue::Text(value)
    }
}

/// The raw shape a device client may hand back from a status fetch.
///
/// Device firmware and client libraries are inconsistent: some return a
/// mapping, some a tuple whose first element is the mapping, some nothing
/// at all, and occasionally a bare scalar. [`StatusPayload::normalize`]
/// collapses all of these into a [`Snapshot`] exactly once, so everything
/// downstream sees a single shape.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPayload {
    /// A proper key/value mapping.
    Mapping(Snapshot),
    /// A tuple-like value; the first element carries the status.
    Composite(Vec<StatusPayload>),
    /// A bare value that is not a mapping.
    Scalar(StatusValue),
    /// Nothing was returned.
    Empty,
}

impl StatusPayload {
    /// Collapse the payload into a snapshot.
    ///
    /// - `Mapping` is returned as-is.
    /// - `Composite` takes its first element (recursively); an empty
    ///   composite yields an empty snapshot.
    /// - `Empty` and `Scalar(Null)` yield an empty snapshot.
    /// - Any other `Scalar` is wrapped under [`RAW_STATUS_KEY`].
    ///
    /// # Examples
    ///
    /// ```
    /// use airpoll_types::{StatusPayload, StatusValue, RAW_STATUS_KEY};
    ///
    /// let snapshot = StatusPayload::Scalar(StatusValue::Int(7)).normalize();
    /// assert_eq!(snapshot.get(RAW_STATUS_KEY), Some(&StatusValue::Int(7)));
    ///
    /// assert!(StatusPayload::Composite(vec![]).normalize().is_empty());
    /// ```
    #[must_use]
    pub fn normalize(self) -> Snapshot {
        match self {
            StatusPayload::Mapping(map) => map,
            StatusPayload::Composite(items) => items
                .into_iter()
                .next()
                .map(StatusPayload::normalize)
                .unwrap_or_default(),
            StatusPayload::Empty | StatusPayload::Scalar(StatusValue::Null) => Snapshot::new(),
            StatusPayload::Scalar(value) => {
                let mut map = Snapshot::new();
                map.insert(RAW_STATUS_KEY.to_string(), value);
                map
            }
        }
    }

    /// Short description of the payload shape, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StatusPayload::Mapping(_) => "mapping",
            StatusPayload::Composite(_) => "composite",
            StatusPayload::Scalar(_) => "scalar",
            StatusPayload::Empty => "empty",
        }
    }
}

impl From<Snapshot> for StatusPayload {
    fn from(map: Snapshot) -> Self {
        StatusPayload::Mapping(map)
    }
}

impl From<Option<Snapshot>> for StatusPayload {
    fn from(map: Option<Snapshot>) -> Self {
        map.map_or(StatusPayload::Empty, StatusPayload::Mapping)
    }
}

/// Transport protocol tag carried in the device configuration.
///
/// The manager never speaks the protocol itself; the tag is handed to the
/// device client factory, which picks the matching security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[non_exhaustive]
pub enum Protocol {
    /// Plain CoAP.
    Coap,
    /// Encrypted CoAP (the purifier default).
    #[default]
    Coaps,
    /// Legacy HTTP API of older firmware.
    Http,
}

impl Protocol {
    /// Lowercase tag as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Coap => "coap",
            Protocol::Coaps => "coaps",
            Protocol::Http => "http",
        }
    }

    /// Whether the protocol runs an encrypted session handshake.
    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::Coaps)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coap" => Ok(Protocol::Coap),
            "coaps" => Ok(Protocol::Coaps),
            "http" => Ok(Protocol::Http),
            other => Err(ParseError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Derive the stable device id the polling scripts use for an address.
///
/// # Examples
///
/// ```
/// use airpoll_types::device_id_for_address;
///
/// assert_eq!(device_id_for_address("192.168.88.150"), "device_192_168_88_150");
/// ```
#[must_use]
pub fn device_id_for_address(address: &str) -> String {
    format!("device_{}", address.replace('.', "_"))
}
