//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the problem is in turning messages into
//! bytes or back (codec, frame marker, compression), never in networking or
//! game rules.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Binary (bincode) serialization or deserialization failed.
    #[error("bincode codec failed: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// JSON deserialization failed.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// zstd compression or decompression failed.
    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    /// A frame arrived without the leading marker byte.
    #[error("empty frame")]
    EmptyFrame,

    /// The leading marker byte is not one we know.
    #[error("unknown frame marker {0:#04x}")]
    UnknownFrameMarker(u8),

    /// The message decoded, but violates protocol rules (for example an
    /// unknown move kind).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
