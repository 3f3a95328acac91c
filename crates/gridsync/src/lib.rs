//! # Gridsync
//!
//! Real-time world synchronisation for a large shared chess board.
//!
//! One authoritative loop owns the only [`BoardWriter`](gridsync_board::BoardWriter)
//! and applies moves in arrival order. Every connected client gets a
//! session: an inbound task that validates and rate-limits requests, an
//! outbound task that writes frames, and an actor that batches the deltas
//! its viewport cares about and resends snapshots as the viewport drifts.
//! A zone index ([`ClientManager`]) decides which sessions hear about each
//! mutation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridsync::prelude::*;
//!
//! # async fn run() -> Result<(), GridsyncError> {
//! let server = GridServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .action_log("actions.jsonl")
//!     .build()
//!     .await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```

pub mod client;
pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
mod handler;
pub mod persistence;
pub mod server;

pub use client::{Client, ClientId, ClientSetup, SessionChannels, SessionCommand};
pub use client_manager::ClientManager;
pub use config::{LoopConfig, ServerConfig, SessionConfig, SideAssignment, SpawnPolicy};
pub use error::GridsyncError;
pub use game::{
    DropReason, FanoutEvent, GameServer, GameServerHandle, GameState, MoveRequest, Request,
    SubmitOutcome, run_fanout,
};
pub use persistence::{ActionLog, ActionLogWriter, ActionRecord, ActionSink, NullSink};
pub use server::{GridServer, GridServerBuilder, ServerHandle};

/// Everything needed to configure and run a server.
pub mod prelude {
    pub use crate::{
        ActionSink, GridServer, GridServerBuilder, GridsyncError, LoopConfig, ServerConfig,
        ServerHandle, SessionConfig, SideAssignment, SpawnPolicy,
    };
    pub use gridsync_board::{BoardConfig, MoveRules, StandardRules};
    pub use gridsync_protocol::{Position, Side};
    pub use gridsync_session::{AbuseConfig, LimitsConfig};
}
