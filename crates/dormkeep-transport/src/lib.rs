//! Transport layer for Dormkeep.
//!
//! Accepting a client happens in two steps so one slow peer never holds
//! up another:
//!
//! 1. [`Transport::accept`] takes the next raw socket off the listener. It
//!    does no protocol work and returns as soon as a peer connects.
//! 2. [`Incoming::upgrade`] completes the protocol handshake under a
//!    deadline, normally on the connection's own task.
//!
//! The resulting [`Connection`] must allow a send while another task (or
//! another `select!` branch) is parked in `recv`: the service pushes
//! change notices to idle clients that way.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{IncomingWebSocket, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Opaque identifier for a connection, assigned when the socket is
/// accepted and kept through the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A listener handing out raw, not yet upgraded peers.
pub trait Transport: Send + Sync + 'static {
    type Incoming: Incoming<Connection = Self::Connection, Error = Self::Error>;
    type Connection: Connection<Error = Self::Error>;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next peer. Never waits on the peer itself.
    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error>;
}

/// An accepted peer that has not finished the protocol handshake.
pub trait Incoming: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> SocketAddr;

    /// Completes the handshake, giving up once `timeout` has passed.
    async fn upgrade(self, timeout: Duration) -> Result<Self::Connection, Self::Error>;
}

/// One upgraded client connection carrying whole frames.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed cleanly. Cancel-safe: a
    /// dropped `recv` future loses no frame.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Starts a clean close.
    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> SocketAddr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7).into_inner(), 7);
    }

    #[test]
    fn test_connection_id_as_map_key() {
        use std::collections::HashMap;
        let mut open = HashMap::new();
        open.insert(ConnectionId::new(1), "warden");
        open.insert(ConnectionId::new(2), "resident");
        assert_eq!(open[&ConnectionId::new(2)], "resident");
    }
}
