//! Consecutive-failure bookkeeping.
//!
//! These functions only mutate a [`DeviceStatus`]. Discarding the session,
//! logging and event emission are the manager's job, driven by the returned
//! records.

use time::OffsetDateTime;

use airpoll_types::Snapshot;

use crate::error::{Error, FailureKind};
use crate::status::DeviceStatus;

/// Result of [`record_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    /// Consecutive failures, including this one.
    pub error_count: u32,
    /// Classification of this failure.
    pub kind: FailureKind,
    /// Whether the count has reached the retry budget.
    pub exhausted: bool,
}

/// Count a failed request against the device.
///
/// Connectivity drops on the first failure. The cached snapshot is left as it
/// was so readers keep the last known state.
pub fn record_failure(status: &mut DeviceStatus, max_retries: u32, error: &Error) -> FailureRecord {
    let kind = error.failure_kind().unwrap_or(FailureKind::Transport);

    status.error_count = status.error_count.saturating_add(1);
    status.last_error = Some(error.to_string());
    status.last_failure_kind = Some(kind);
    status.is_connected = false;

    FailureRecord {
        error_count: status.error_count,
        kind,
        exhausted: status.error_count >= max_retries,
    }
}

/// Commit a successful fetch.
///
/// Replaces the snapshot whole and clears the failure state. Returns the
/// number of consecutive failures that preceded this success.
pub fn record_success(status: &mut DeviceStatus, snapshot: Snapshot, now: OffsetDateTime) -> u32 {
    let previous_failures = status.error_count;

    status.snapshot = Some(snapshot);
    status.last_update = Some(now);
    status.last_success = Some(now);
    status.is_connected = true;
    status.error_count = 0;
    status.last_error = None;
    status.last_failure_kind = None;

    previous_failures
}
