//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes. The
//! server never cares HOW messages are serialized, only that something
//! implements [`Codec`]. [`BincodeCodec`] is the production format;
//! [`JsonCodec`] (behind the `json` feature) is handy when inspecting
//! traffic by hand.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `encode_into` appends to a caller-owned buffer so hot paths (batched
/// move deltas, snapshots) can reuse a scratch `Vec` between messages.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a fresh buffer.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        self.encode_into(value, &mut buf)?;
        Ok(buf)
    }

    /// Serializes a value, appending to `buf`.
    fn encode_into<T: Serialize + ?Sized>(
        &self,
        value: &T,
        buf: &mut Vec<u8>,
    ) -> Result<(), ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Fails if the bytes are malformed, truncated, or do not match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] using bincode's compact binary format. The schema is the Rust
/// types in [`crate::types`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode_into<T: Serialize + ?Sized>(
        &self,
        value: &T,
        buf: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        bincode::serialize_into(buf, value)?;
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Much larger on the wire than bincode, but readable in browser DevTools.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode_into<T: Serialize + ?Sized>(
        &self,
        value: &T,
        buf: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        serde_json::to_writer(buf, value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, ClientMove, ServerMessage};

    #[test]
    fn test_bincode_encode_into_appends_to_existing_buffer() {
        let codec = BincodeCodec;
        let mut buf = vec![0xAA];
        codec.encode_into(&ServerMessage::Pong, &mut buf).unwrap();

        assert_eq!(buf[0], 0xAA);
        let decoded: ServerMessage = codec.decode(&buf[1..]).unwrap();
        assert_eq!(decoded, ServerMessage::Pong);
    }

    #[test]
    fn test_bincode_decode_move_keeps_raw_kind() {
        let codec = BincodeCodec;
        let msg = ClientMessage::Move(ClientMove {
            piece_id: 12,
            from_x: 1,
            from_y: 1,
            to_x: 1,
            to_y: 2,
            kind: 200,
            move_token: 99,
        });
        let bytes = codec.encode(&msg).unwrap();
        let decoded: ClientMessage = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_bincode_decode_garbage_returns_error() {
        let result: Result<ClientMessage, _> = BincodeCodec.decode(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(ProtocolError::Bincode(_))));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_codec_decodes_hand_written_message() {
        let msg: ClientMessage = JsonCodec
            .decode(br#"{"Subscribe":{"center_x":3,"center_y":4}}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                center_x: 3,
                center_y: 4
            }
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_codec_decode_garbage_returns_decode_error() {
        let result: Result<ClientMessage, _> = JsonCodec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
