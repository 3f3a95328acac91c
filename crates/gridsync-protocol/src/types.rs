//! Core protocol types for gridsync's wire format.
//!
//! Every type in this module is serialized by a [`Codec`](crate::Codec) and
//! travels inside exactly one WebSocket binary frame. The enums use serde's
//! default (externally tagged) representation so the same types work for
//! both the compact bincode codec and the JSON debugging codec.
//!
//! Client-supplied coordinates are `u32` on the wire, wider than the board's
//! `u16` coordinates, so that out-of-range values can be represented and
//! rejected by bounds checks instead of silently wrapping.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Sequence number carried by fabricated `ValidMove` acknowledgements.
///
/// Real sequence numbers never get near this value, so clients that are
/// being quietly ignored cannot tell from the message shape alone.
pub const DISGUISED_SEQNUM: u64 = 9_999_999_999;

// ---------------------------------------------------------------------------
// Identity and geometry
// ---------------------------------------------------------------------------

/// Unique identifier of a piece on the board.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PieceId(pub u32);

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "piece-{}", self.0)
    }
}

/// A cell on the board.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

impl Position {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Which side a piece (or a player) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// The category of a piece. Movement legality per kind lives in the board's
/// rules, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

/// A live piece as the client sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceData {
    pub id: PieceId,
    pub kind: PieceKind,
    pub side: Side,
    pub position: Position,
    pub move_count: u16,
    pub capture_count: u16,
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// How a move should be interpreted by the rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveKind {
    Normal,
    /// King and rook move together.
    Castle,
    /// Pawn captures a pawn beside it by moving diagonally onto an empty
    /// cell.
    EnPassant,
}

impl TryFrom<u8> for MoveKind {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Castle),
            2 => Ok(Self::EnPassant),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown move kind {other}"
            ))),
        }
    }
}

impl From<MoveKind> for u8 {
    fn from(kind: MoveKind) -> Self {
        match kind {
            MoveKind::Normal => 0,
            MoveKind::Castle => 1,
            MoveKind::EnPassant => 2,
        }
    }
}

/// A move exactly as the client sent it. Nothing here has been validated.
///
/// `kind` stays a raw byte so that an unknown kind is a semantic rejection
/// (dropped quietly) instead of a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMove {
    pub piece_id: u32,
    pub from_x: u32,
    pub from_y: u32,
    pub to_x: u32,
    pub to_y: u32,
    pub kind: u8,
    pub move_token: u32,
}

/// Every message a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    Move(ClientMove),
    /// "I am now looking at this cell."
    Subscribe { center_x: u32, center_y: u32 },
    /// Application-level ping, answered with [`ServerMessage::Pong`].
    Ping,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// All live pieces within the snapshot radius of `center`, as of `seqnum`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub seqnum: u64,
    pub center: Position,
    pub pieces: Vec<PieceData>,
}

/// One piece relocated by an applied move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedPiece {
    pub from: Position,
    /// The piece after the move.
    pub piece: PieceData,
    pub seqnum: u64,
}

/// One piece removed from the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPiece {
    pub piece_id: PieceId,
    pub position: Position,
    pub seqnum: u64,
}

/// Every message the server may send.
///
/// The variant order is part of the binary format. [`SnapshotMessage`]
/// mirrors the first two variants and must stay in step with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// First message of every session.
    InitialState {
        position: Position,
        side: Side,
        snapshot: Snapshot,
    },
    Snapshot(Snapshot),
    /// Batched deltas for the session's area of interest.
    MovesAndCaptures {
        moves: Vec<MovedPiece>,
        captures: Vec<CapturedPiece>,
    },
    InvalidMove { move_token: u32 },
    ValidMove {
        move_token: u32,
        as_of_seqnum: u64,
        captured_piece_id: Option<PieceId>,
    },
    /// Pieces that changed side, shown after the change.
    Adoption { seqnum: u64, adopted: Vec<PieceData> },
    BulkCapture {
        seqnum: u64,
        captured: Vec<CapturedPiece>,
    },
    Pong,
}

/// Borrowed view of the snapshot-carrying [`ServerMessage`] variants.
///
/// Snapshots are built in pooled buffers; this lets them be encoded without
/// moving the buffer out of its pool guard. It serializes to exactly the
/// same bytes as the matching owned variant.
#[derive(Debug, Serialize)]
#[serde(rename = "ServerMessage")]
pub enum SnapshotMessage<'a> {
    InitialState {
        position: Position,
        side: Side,
        snapshot: &'a Snapshot,
    },
    Snapshot(&'a Snapshot),
}

// =========================================================================
// Tests
// =========================================================================
