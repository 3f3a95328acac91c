//! Transport abstraction layer for gridsync.
//!
//! Provides the [`Transport`], [`PendingConnection`] and [`Connection`]
//! traits that abstract over the network protocol. Accepting is split in
//! two steps so the server can look at the peer address (ban list,
//! per-IP limits) before spending anything on the protocol handshake, and
//! so a slow handshake never stalls the accept loop.
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
pub use websocket::{PendingWebSocket, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a connection can yield besides a clean close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One application frame.
    Frame(Bytes),
    /// Answer to a keepalive [`Connection::ping`].
    Pong,
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// A connection that has been accepted but not upgraded yet.
    type Pending: PendingConnection<Connection = Self::Connection, Error = Self::Error>;
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// The address this transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// An accepted connection that still needs its protocol handshake.
pub trait PendingConnection: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Remote address of the peer.
    fn peer_addr(&self) -> SocketAddr;

    /// Completes the handshake. Frames larger than `max_frame_size` will be
    /// reported as errors by [`Connection::recv`].
    async fn establish(self, max_frame_size: usize) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive frames.
///
/// Sending and receiving are independent: a task parked in `recv` never
/// holds up another task's `send`.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one binary frame.
    async fn send(&self, frame: Bytes) -> Result<(), Self::Error>;

    /// Receives the next frame or keepalive answer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Inbound>, Self::Error>;

    /// Sends a transport-level keepalive ping.
    async fn ping(&self) -> Result<(), Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Remote address of the peer.
    fn peer_addr(&self) -> SocketAddr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_inbound_frame_equality() {
        assert_eq!(
            Inbound::Frame(Bytes::from_static(b"a")),
            Inbound::Frame(Bytes::from_static(b"a"))
        );
        assert_ne!(Inbound::Frame(Bytes::new()), Inbound::Pong);
    }
}
