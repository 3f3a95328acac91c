//! Error types for the board layer.

use gridsync_protocol::{PieceId, Position};

/// Why a move was not applied.
///
/// Every variant ends up as the same `InvalidMove` on the wire; the detail
/// is for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveRejection {
    /// A coordinate is outside the board.
    #[error("position {0} is out of bounds")]
    OutOfBounds(Position),

    /// No live piece has this id.
    #[error("{0} does not exist")]
    NoSuchPiece(PieceId),

    /// The piece exists, but not where the client thinks it is. Usually a
    /// move that was superseded by an earlier one.
    #[error("{piece} is not at {at}")]
    NotAtPosition { piece: PieceId, at: Position },

    /// The piece belongs to the other side.
    #[error("{0} belongs to the other side")]
    WrongSide(PieceId),

    /// `from` and `to` are the same cell.
    #[error("move does not change position")]
    NoMovement,

    /// The destination holds a piece that cannot be captured.
    #[error("destination {0} is occupied")]
    Occupied(Position),

    /// The rules refused the move.
    #[error("illegal move: {0}")]
    Illegal(&'static str),

    /// The rules produced a plan that breaks board invariants.
    #[error("inconsistent move plan: {0}")]
    InvalidPlan(&'static str),

    /// The game has ended; no further mutations are applied.
    #[error("game is over")]
    GameOver,
}

/// Errors from board construction and bulk mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// The initial layout puts a piece outside the board, two pieces on one
    /// cell, or reuses an id.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// A bulk mutation matched no pieces. Nothing changed.
    #[error("no pieces matched")]
    NothingAffected,

    /// The game has ended; no further mutations are applied.
    #[error("game is over")]
    GameOver,
}
