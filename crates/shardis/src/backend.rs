//! The seam between the router and whatever talks to a backend server.

use async_trait::async_trait;
use bytes::Bytes;
use shardis_protocol::Frame;
use tokio::sync::broadcast;

use crate::error::ShardError;
use crate::events::ConnectionEvent;

/// One persistent client handle for one backend address.
///
/// The router only ever borrows backends (`&self`), so implementations
/// serialise access internally. [`Connection`](crate::Connection) is the
/// TCP implementation; tests plug in in-memory ones.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Sends one request (command tokens followed by arguments) and
    /// returns the reply. An error reply from the server comes back as
    /// [`ShardError::Server`] carrying the server's message unchanged.
    async fn call(&self, request: Vec<Bytes>) -> Result<Frame, ShardError>;

    /// Runs `batch` atomically (MULTI ... EXEC) and returns one reply per
    /// request, in submission order. Per-command error replies inside a
    /// committed transaction are returned in place as [`Frame::Error`];
    /// an aborted transaction fails the whole call.
    async fn exec(&self, batch: Vec<Vec<Bytes>>) -> Result<Vec<Frame>, ShardError>;

    /// Subscribes to this backend's lifecycle events.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Establishes the connection ahead of the first call. Backends that
    /// have nothing to set up keep the default.
    async fn connect(&self) -> Result<(), ShardError> {
        Ok(())
    }
}
