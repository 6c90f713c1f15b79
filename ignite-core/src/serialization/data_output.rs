//! Primitive writes into a growable frame body.

use super::ByteOrder;
use crate::error::{IgniteError, Result};
use bytes::{BufMut, Bytes, BytesMut};

macro_rules! ordered_bytes {
    ($order:expr, $v:expr) => {
        match $order {
            ByteOrder::LittleEndian => $v.to_le_bytes(),
            ByteOrder::BigEndian => $v.to_be_bytes(),
        }
    };
}

/// Writing side of the wire codec.
///
/// Implementors only append raw bytes; typed writes are derived from that and
/// honor [`byte_order`](DataOutput::byte_order).
pub trait DataOutput {
    /// Order used for multi-byte values.
    fn byte_order(&self) -> ByteOrder;

    /// Appends raw bytes with no length prefix.
    fn write_bytes(&mut self, v: &[u8]) -> Result<()>;

    /// Writes one unsigned byte.
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    /// Writes one signed byte.
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// `true` is written as 1, `false` as 0.
    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(u8::from(v))
    }

    /// Writes an `i16`.
    fn write_short(&mut self, v: i16) -> Result<()> {
        self.write_bytes(&ordered_bytes!(self.byte_order(), v))
    }

    /// Writes one UTF-16 code unit.
    fn write_char(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&ordered_bytes!(self.byte_order(), v))
    }

    /// Writes an `i32`.
    fn write_int(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&ordered_bytes!(self.byte_order(), v))
    }

    /// Writes an `i64`.
    fn write_long(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&ordered_bytes!(self.byte_order(), v))
    }

    /// Writes an IEEE 754 `f32`.
    fn write_float(&mut self, v: f32) -> Result<()> {
        self.write_bytes(&ordered_bytes!(self.byte_order(), v))
    }

    /// Writes an IEEE 754 `f64`.
    fn write_double(&mut self, v: f64) -> Result<()> {
        self.write_bytes(&ordered_bytes!(self.byte_order(), v))
    }

    /// Writes an `i32` byte length followed by the UTF-8 bytes. No type code.
    fn write_string(&mut self, v: &str) -> Result<()> {
        let len = i32::try_from(v.len()).map_err(|_| {
            IgniteError::Serialization(format!("{}-byte string exceeds i32 length", v.len()))
        })?;
        self.write_int(len)?;
        self.write_bytes(v.as_bytes())
    }
}

/// Growable body buffer backed by [`BytesMut`].
#[derive(Debug, Clone)]
pub struct ObjectDataOutput {
    buffer: BytesMut,
    order: ByteOrder,
}

impl ObjectDataOutput {
    const DEFAULT_CAPACITY: usize = 256;

    /// Little-endian output.
    pub fn new() -> Self {
        Self::with_order(ByteOrder::LittleEndian)
    }

    /// Output in the given byte order.
    pub fn with_order(order: ByteOrder) -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY, order)
    }

    /// Output with a preallocated buffer.
    pub fn with_capacity(capacity: usize, order: ByteOrder) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            order,
        }
    }

    /// Byte order of this output.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Copies the written bytes into a `Vec`.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Hands the written bytes off without copying.
    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discards everything written.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Rewrites an `i32` placeholder, typically a length or offset known only
    /// after the following bytes were written.
    pub fn patch_int(&mut self, pos: usize, v: i32) -> Result<()> {
        self.patch(pos, &ordered_bytes!(self.order, v))
    }

    /// Rewrites an `i16` at `pos`.
    pub fn patch_short(&mut self, pos: usize, v: i16) -> Result<()> {
        self.patch(pos, &ordered_bytes!(self.order, v))
    }

    /// Rewrites one byte at `pos`.
    pub fn patch_u8(&mut self, pos: usize, v: u8) -> Result<()> {
        self.patch(pos, &[v])
    }

    fn patch(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let written = self.buffer.len();
        let target = pos
            .checked_add(bytes.len())
            .and_then(|end| self.buffer.get_mut(pos..end))
            .ok_or_else(|| {
                IgniteError::Serialization(format!(
                    "cannot patch {} bytes at {}: only {} written",
                    bytes.len(),
                    pos,
                    written
                ))
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for ObjectDataOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl DataOutput for ObjectDataOutput {
    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        self.buffer.put_slice(v);
        Ok(())
    }
}
