//! Wire protocol for gridsync.
//!
//! This crate defines everything that sits between raw transport bytes and
//! the game server:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], [`Position`],
//!   [`PieceData`], ...): the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`BincodeCodec`], [`JsonCodec`]): how
//!   those structures become bytes.
//! - **Frames** ([`FrameEncoder`], [`decode_frame`]): the one-byte
//!   compression marker and the pooled zstd compressors behind it.
//! - **Pools** ([`Pool`], [`Pooled`]): reusable buffers that go back to
//!   their pool when the guard is dropped.
//!
//! ```text
//! Transport (bytes) → Protocol (frame → codec → message) → Game server
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod frame;
mod pool;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{BincodeCodec, Codec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{FRAME_RAW, FRAME_ZSTD, FrameEncoder, decode_frame};
pub use pool::{Pool, Pooled, Recycle};
pub use types::{
    CapturedPiece, ClientMessage, ClientMove, DISGUISED_SEQNUM, MoveKind,
    MovedPiece, PieceData, PieceId, PieceKind, Position, ServerMessage, Side,
    Snapshot, SnapshotMessage,
};
