//! Error types for the session layer.

use std::net::IpAddr;

/// Errors raised while admitting or pacing a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The address already holds the maximum number of live connections.
    #[error("too many connections from {ip} ({count})")]
    TooManyConnections { ip: IpAddr, count: usize },

    /// A wait on a limiter was abandoned because the session is shutting
    /// down.
    #[error("rate limiter wait cancelled")]
    Cancelled,
}
