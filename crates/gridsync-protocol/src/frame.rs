//! Outbound frame layout and compression.
//!
//! Every server→client frame starts with one marker byte:
//!
//! ```text
//! ┌────────┬───────────────────────────────┐
//! │ 0x00   │ codec bytes                   │  small payloads
//! ├────────┼───────────────────────────────┤
//! │ 0x01   │ zstd frame of the codec bytes │  payloads >= min_compress_bytes
//! └────────┴───────────────────────────────┘
//! ```
//!
//! Client→server frames carry bare codec bytes; clients never compress.

use bytes::Bytes;
use zstd::bulk::Compressor;

use crate::{Pool, ProtocolError, Recycle};

/// Marker for an uncompressed payload.
pub const FRAME_RAW: u8 = 0x00;
/// Marker for a zstd-compressed payload.
pub const FRAME_ZSTD: u8 = 0x01;

/// A lazily-built zstd context that lives in a [`Pool`].
struct PooledCompressor {
    level: i32,
    inner: Option<Compressor<'static>>,
}

impl PooledCompressor {
    fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut compressor = match self.inner.take() {
            Some(c) => c,
            None => Compressor::new(self.level).map_err(ProtocolError::Compression)?,
        };
        let result = compressor.compress(payload);
        self.inner = Some(compressor);
        result.map_err(ProtocolError::Compression)
    }
}

impl Recycle for PooledCompressor {
    fn recycle(&mut self) {}
}

/// Turns encoded messages into outbound frames, compressing large ones with
/// a pooled zstd compressor.
#[derive(Clone)]
pub struct FrameEncoder {
    min_compress_bytes: usize,
    compressors: Pool<PooledCompressor>,
}

impl FrameEncoder {
    /// `max_idle` bounds how many compressor contexts are kept warm.
    pub fn new(min_compress_bytes: usize, level: i32, max_idle: usize) -> Self {
        Self {
            min_compress_bytes,
            compressors: Pool::with_factory(max_idle, move || PooledCompressor {
                level,
                inner: None,
            }),
        }
    }

    /// Builds a frame for `payload`. The payload is always copied, so the
    /// caller may reuse its buffer straight away.
    pub fn frame(&self, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        if payload.len() < self.min_compress_bytes {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(FRAME_RAW);
            out.extend_from_slice(payload);
            return Ok(Bytes::from(out));
        }

        let compressed = self.compressors.get().compress(payload)?;
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(FRAME_ZSTD);
        out.extend_from_slice(&compressed);
        Ok(Bytes::from(out))
    }

    pub fn min_compress_bytes(&self) -> usize {
        self.min_compress_bytes
    }
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("min_compress_bytes", &self.min_compress_bytes)
            .finish_non_exhaustive()
    }
}

/// Strips the marker byte and decompresses if needed. Used by clients and
/// tests; the server itself only ever builds frames.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let (&marker, body) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
    match marker {
        FRAME_RAW => Ok(body.to_vec()),
        FRAME_ZSTD => zstd::stream::decode_all(body).map_err(ProtocolError::Compression),
        other => Err(ProtocolError::UnknownFrameMarker(other)),
    }
}
