//! Authoritative board state for gridsync.
//!
//! The board is created once as a pair of handles:
//!
//! - [`BoardWriter`]: the only handle that can mutate. It is not `Clone`;
//!   whoever owns it (the authoritative loop) is the single writer.
//! - [`Board`]: a cheap, cloneable read handle for snapshots and lookups
//!   from any task.
//!
//! Movement legality is not hard-coded: the writer asks a [`MoveRules`]
//! implementation for a [`MovePlan`] and then re-checks the plan against
//! the board's own invariants (bounds, one piece per cell, ownership).
//! [`StandardRules`] is a chess-like default.

mod board;
mod config;
mod error;
pub mod geometry;
pub mod layout;
mod rules;

pub use board::{
    AdoptionRequest, AdoptionResult, Board, BoardWriter, BulkCaptureRequest, BulkCaptureResult,
    CaptureFilter, MoveIntent, MoveResult, Region,
};
pub use config::BoardConfig;
pub use error::{BoardError, MoveRejection};
pub use geometry::ZoneId;
pub use rules::{BoardView, MovePlan, MoveRules, StandardRules};
