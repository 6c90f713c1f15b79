//! Length-prefixed framing for the thin client protocol.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::{DEFAULT_MAX_FRAME_SIZE, SIZE_OF_LENGTH_FIELD};
use crate::error::{IgniteError, Result};
use crate::serialization::ByteOrder;

/// Codec splitting a byte stream into frame bodies.
///
/// Decoding yields each body without its `i32` length prefix; encoding
/// prepends the prefix. Implements the `tokio_util::codec` traits for use
/// with framed I/O.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    order: ByteOrder,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a codec for the given byte order.
    pub fn new(order: ByteOrder) -> Self {
        Self::with_max_frame_size(order, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a codec rejecting frames longer than `max_frame_size`.
    pub fn with_max_frame_size(order: ByteOrder, max_frame_size: usize) -> Self {
        Self {
            order,
            max_frame_size,
        }
    }

    fn read_length(&self, src: &[u8]) -> i32 {
        let raw = [src[0], src[1], src[2], src[3]];
        match self.order {
            ByteOrder::LittleEndian => i32::from_le_bytes(raw),
            ByteOrder::BigEndian => i32::from_be_bytes(raw),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(ByteOrder::LittleEndian)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = IgniteError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size {
            return Err(IgniteError::Protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                item.len(),
                self.max_frame_size
            )));
        }
        let len = item.len() as i32;
        dst.reserve(SIZE_OF_LENGTH_FIELD + item.len());
        match self.order {
            ByteOrder::LittleEndian => dst.put_i32_le(len),
            ByteOrder::BigEndian => dst.put_i32(len),
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = IgniteError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < SIZE_OF_LENGTH_FIELD {
            return Ok(None);
        }

        let len = self.read_length(src);
        let len = usize::try_from(len)
            .map_err(|_| IgniteError::Protocol(format!("negative frame length {}", len)))?;
        if len > self.max_frame_size {
            tracing::warn!(len, max = self.max_frame_size, "rejecting oversized inbound frame");
            return Err(IgniteError::Protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame_size
            )));
        }

        let total = SIZE_OF_LENGTH_FIELD + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(SIZE_OF_LENGTH_FIELD);
        Ok(Some(src.split_to(len)))
    }
}
