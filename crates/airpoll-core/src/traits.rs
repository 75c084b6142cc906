//! Trait abstractions for the device-client collaborator.
//!
//! The manager never encodes the purifier wire protocol itself. It is handed
//! a [`ClientFactory`] that builds [`DeviceClient`] sessions, and decides only
//! *when* and *how often* those capabilities are invoked. The same traits are
//! implemented by [`crate::mock::MockClient`] for tests.

use async_trait::async_trait;

use airpoll_types::{Protocol, Snapshot, StatusPayload};

use crate::error::Result;

/// A live session with one device.
///
/// A session is created by [`ClientFactory::construct`], initialized once
/// with [`DeviceClient::initialize`], reused across poll cycles, and finally
/// closed. The manager holds at most one session per device id.
///
/// # Example
///
/// ```ignore
/// use airpoll_core::{DeviceClient, Result};
///
/// async fn print_status<C: DeviceClient + ?Sized>(client: &C) -> Result<()> {
///     let snapshot = client.fetch_status().await?.normalize();
///     println!("{} fields", snapshot.len());
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Run the session handshake.
    ///
    /// Called exactly once per constructed client, before any other request.
    async fn initialize(&self) -> Result<()>;

    /// Fetch the current status.
    ///
    /// The payload may come back in any of the shapes [`StatusPayload`]
    /// models; the manager normalizes it.
    async fn fetch_status(&self) -> Result<StatusPayload>;

    /// Push one or more control values to the device.
    async fn push_control_values(&self, values: &Snapshot) -> Result<()>;

    /// Close the session.
    ///
    /// Must be safe to call more than once. Errors are logged by the manager
    /// and never escalated.
    async fn close(&self) -> Result<()>;
}

/// Builds device clients for an address.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Construct an uninitialized client for the device at `address:port`.
    ///
    /// `protocol` selects the security mode of the session.
    async fn construct(
        &self,
        address: &str,
        port: u16,
        protocol: Protocol,
    ) -> Result<Box<dyn DeviceClient>>;
}
