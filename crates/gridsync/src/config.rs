//! Server configuration.
//!
//! Every struct here has a `Default` that matches production settings, so
//! callers override only what they need:
//!
//! ```rust
//! use std::time::Duration;
//! use gridsync::SessionConfig;
//!
//! let config = SessionConfig {
//!     batch_interval: Duration::from_millis(50),
//!     ..SessionConfig::default()
//! };
//! assert_eq!(config.outbound_queue, 32);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use gridsync_board::BoardConfig;
use gridsync_protocol::{Position, Side};
use gridsync_session::{AbuseConfig, LimitsConfig};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timers, buffers, and view geometry for each connected session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// A session that sends nothing (not even a keepalive pong) for this
    /// long is closed.
    pub read_timeout: Duration,

    /// How often the transport-level keepalive ping is sent.
    pub ping_interval: Duration,

    /// How often the heartbeat checks for a stale snapshot.
    pub heartbeat_interval: Duration,

    /// The heartbeat resends a snapshot when the last one is older than
    /// this.
    pub heartbeat_staleness: Duration,

    /// Buffered moves and captures are flushed at least this often.
    pub batch_interval: Duration,

    /// Flush early once this many moves are buffered.
    pub move_buffer_threshold: usize,

    /// Flush early once this many captures are buffered.
    pub capture_buffer_threshold: usize,

    /// Capacity of the per-session outbound frame queue. A session whose
    /// queue fills up is closed.
    pub outbound_queue: usize,

    /// Capacity of the per-session command queue fed by the fanout task.
    pub command_queue: usize,

    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,

    /// Outbound payloads at least this large are zstd-compressed.
    pub min_compress_bytes: usize,

    /// zstd level for outbound compression.
    pub compression_level: i32,

    /// A move is forwarded to a session when its origin or destination is
    /// within this many cells (per axis) of the session's position. Keep it
    /// a little above the board's snapshot radius so pieces entering the
    /// view from just outside are not missed.
    pub interest_radius: u16,

    /// Half the width of the area the client actually displays. A new
    /// snapshot is due once the client has moved more than
    /// `snapshot_radius - client_half_view` from the last one.
    pub client_half_view: u16,

    /// A session counts as active if it acted within this window.
    pub activity_threshold: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(63),
            heartbeat_staleness: Duration::from_secs(5),
            batch_interval: Duration::from_millis(225),
            move_buffer_threshold: 256,
            capture_buffer_threshold: 64,
            outbound_queue: 32,
            command_queue: 256,
            max_frame_size: 256,
            min_compress_bytes: 64,
            compression_level: 3,
            interest_radius: 34,
            client_half_view: 12,
            activity_threshold: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// LoopConfig
// ---------------------------------------------------------------------------

/// Queues and deadlines of the authoritative loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Capacity of the session → loop request queue.
    pub request_queue: usize,

    /// Capacity of the loop → fanout event queue.
    pub fanout_queue: usize,

    /// How long a session waits for room in a full request queue before
    /// dropping the request.
    pub enqueue_timeout: Duration,

    /// How long queued requests are still processed after the loop is
    /// told to stop.
    pub drain_grace: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            request_queue: 1024,
            fanout_queue: 1024,
            enqueue_timeout: Duration::from_millis(250),
            drain_grace: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn and side assignment
// ---------------------------------------------------------------------------

/// Where a new session's view starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnPolicy {
    Fixed(Position),
    /// Uniformly random cell on the board.
    Random,
}

/// Which side a new session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideAssignment {
    /// White, Black, White, ... in connection order.
    Alternate,
    Fixed(Side),
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Everything [`GridServerBuilder`](crate::GridServerBuilder) needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub board: BoardConfig,
    pub session: SessionConfig,
    pub game_loop: LoopConfig,
    /// Limits for ordinary sessions.
    pub limits: LimitsConfig,
    /// Limits for sessions from addresses over the soft-limit threshold.
    pub soft_limits: LimitsConfig,
    pub abuse: AbuseConfig,
    pub spawn: SpawnPolicy,
    pub side_assignment: SideAssignment,
    /// How long the WebSocket upgrade may take.
    pub handshake_timeout: Duration,
    /// How long shutdown waits for sessions and the loop to finish.
    pub shutdown_grace: Duration,
    /// When set, every applied mutation is appended to this file as one
    /// JSON line.
    pub action_log_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            board: BoardConfig::default(),
            session: SessionConfig::default(),
            game_loop: LoopConfig::default(),
            limits: LimitsConfig::standard(),
            soft_limits: LimitsConfig::soft(),
            abuse: AbuseConfig::default(),
            spawn: SpawnPolicy::Random,
            side_assignment: SideAssignment::Alternate,
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            action_log_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default_interest_covers_snapshot() {
        let session = SessionConfig::default();
        let board = BoardConfig::default();
        assert!(session.interest_radius > board.snapshot_radius);
        assert!(session.client_half_view < board.snapshot_radius);
    }

    #[test]
    fn test_session_config_default_timers() {
        let config = SessionConfig::default();
        assert_eq!(config.batch_interval, Duration::from_millis(225));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(63));
        assert!(config.ping_interval < config.read_timeout);
    }

    #[test]
    fn test_loop_config_default_enqueue_timeout() {
        assert_eq!(
            LoopConfig::default().enqueue_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_server_config_default_uses_both_limit_presets() {
        let config = ServerConfig::default();
        assert_eq!(config.limits, LimitsConfig::standard());
        assert_eq!(config.soft_limits, LimitsConfig::soft());
        assert!(config.action_log_path.is_none());
    }

    #[test]
    fn test_server_config_json_roundtrip() {
        let config = ServerConfig {
            spawn: SpawnPolicy::Fixed(Position::new(3, 4)),
            side_assignment: SideAssignment::Fixed(Side::Black),
            ..ServerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.spawn, config.spawn);
        assert_eq!(back.side_assignment, config.side_assignment);
        assert_eq!(back.session.outbound_queue, 32);
    }
}
