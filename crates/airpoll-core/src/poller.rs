//! Per-device scheduling units and the fetch-and-update procedure.
//!
//! Each running device gets one task executing [`run`]. A cycle is one call
//! to [`poll_once`], followed by a pause of the device's poll interval
//! measured from the end of the cycle. The same procedure, with panics
//! contained by [`poll_guarded`], serves
//! [`crate::DevicePollingManager::force_poll`] and control refreshes; the
//! device's I/O lock keeps those from overlapping with a scheduled cycle.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use airpoll_types::{Snapshot, StatusPayload, StatusValue};

use crate::error::{Error, Result};
use crate::manager::Shared;
use crate::registry::DeviceEntry;
use crate::status::PollerState;

/// Operation name reported when a status fetch times out.
pub(crate) const FETCH_OPERATION: &str = "get device status";

/// Operation name reported when a poll cycle panics.
pub(crate) const POLL_OPERATION: &str = "poll cycle";

/// Drive one device until cancelled, removed, or the manager stops.
pub(crate) async fn run(shared: Arc<Shared>, entry: Arc<DeviceEntry>, cancel: CancellationToken) {
    let config = &entry.config;

    while !cancel.is_cancelled() && shared.is_running() && !entry.is_retired() {
        entry.set_poller_state(PollerState::Polling);

        let cycle = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = poll_guarded(&shared, &entry, &cancel) => outcome,
        };

        // Device errors were already recorded by the tracker
        let pause = match cycle {
            Err(Error::Panicked { .. }) => config.retry_delay,
            _ => config.poll_interval,
        };

        entry.set_poller_state(PollerState::Sleeping);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(pause) => {}
        }
    }

    if cancel.is_cancelled() {
        info!("Polling cancelled for device {}", entry.id);
        entry.set_poller_state(PollerState::Cancelled);
    } else {
        debug!("Polling loop for device {} exited", entry.id);
        entry.set_poller_state(PollerState::Idle);
    }
}

/// Run [`poll_once`] with client panics contained.
///
/// Shared by the scheduled loop, forced polls and control refreshes.
pub(crate) async fn poll_guarded(
    shared: &Shared,
    entry: &DeviceEntry,
    cancel: &CancellationToken,
) -> Result<Snapshot> {
    contain_panic(entry, POLL_OPERATION, poll_once(shared, entry, cancel)).await
}

/// Await `operation`, turning a panic into [`Error::Panicked`].
///
/// The panic is logged and counted in the device's metrics.
pub(crate) async fn contain_panic<T>(
    entry: &DeviceEntry,
    name: &str,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("Error in polling loop for device {}: {} panicked", entry.id, name);
            entry.metrics.record_panic();
            Err(Error::panicked(entry.id.as_str(), name))
        }
    }
}

/// Run the fetch-and-update procedure once, serialized with other I/O on the device.
///
/// Returns the committed snapshot. Device failures have already been recorded
/// by the time an error is returned.
pub(crate) async fn poll_once(
    shared: &Shared,
    entry: &DeviceEntry,
    cancel: &CancellationToken,
) -> Result<Snapshot> {
    let _io = entry.io_lock.lock().await;
    shared.check_usable(entry)?;

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let client = shared.ensure_session(entry).await?;

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let config = &entry.config;
    debug!(
        "Polling device {} at {}:{}",
        entry.id, config.address, config.port
    );

    let started = Instant::now();
    let outcome = match timeout(config.timeout, client.fetch_status()).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(FETCH_OPERATION, config.timeout)),
    };
    entry.metrics.fetch.record(&outcome, started.elapsed());

    match outcome {
        Ok(payload) => {
            let snapshot = normalize_payload(&entry.id, payload);
            shared.commit_success(entry, snapshot.clone()).await;
            Ok(snapshot)
        }
        Err(e) => {
            shared.record_failure(entry, &e).await;
            Err(e)
        }
    }
}

fn normalize_payload(device_id: &str, payload: StatusPayload) -> Snapshot {
    match &payload {
        StatusPayload::Composite(items) => {
            debug!(
                "Extracted status from {}-element composite reply of {}",
                items.len(),
                device_id
            );
        }
        StatusPayload::Scalar(value) if !matches!(value, StatusValue::Null) => {
            warn!(
                "Unexpected status type from {}: {}",
                device_id,
                payload.kind()
            );
        }
        _ => {}
    }
    payload.normalize()
}
