//! Status observers.
//!
//! An observer is invoked synchronously after a successful poll has been
//! committed to the cache. Whatever it does (return an error or panic) is
//! logged here and goes no further.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, error};

use airpoll_types::Snapshot;

/// Error type observers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every successful status update for one device.
///
/// Any `Fn(&str, &Snapshot) -> Result<(), BoxError>` closure is an observer:
///
/// ```
/// use airpoll_core::{BoxError, StatusObserver};
/// use airpoll_types::Snapshot;
///
/// let observer = |device_id: &str, snapshot: &Snapshot| -> Result<(), BoxError> {
///     println!("{device_id}: {} fields", snapshot.len());
///     Ok(())
/// };
/// observer.on_status("d1", &Snapshot::new()).unwrap();
/// ```
pub trait StatusObserver: Send + Sync {
    /// Handle a fresh snapshot.
    fn on_status(&self, device_id: &str, snapshot: &Snapshot) -> Result<(), BoxError>;
}

impl<F> StatusObserver for F
where
    F: Fn(&str, &Snapshot) -> Result<(), BoxError> + Send + Sync,
{
    fn on_status(&self, device_id: &str, snapshot: &Snapshot) -> Result<(), BoxError> {
        self(device_id, snapshot)
    }
}

/// Invoke an observer, containing any failure.
///
/// Returns `true` if the observer completed without error.
pub(crate) fn dispatch(observer: &dyn StatusObserver, device_id: &str, snapshot: &Snapshot) -> bool {
    match catch_unwind(AssertUnwindSafe(|| observer.on_status(device_id, snapshot))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Error in status callback for {}: {}", device_id, e);
            debug!("Status data that caused error: {:?}", snapshot);
            false
        }
        Err(_) => {
            error!("Status callback for {} panicked", device_id);
            false
        }
    }
}
