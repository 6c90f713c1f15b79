//! Primitive reads over a borrowed frame body.

use super::ByteOrder;
use crate::error::{IgniteError, Result};

/// Decodes a fixed-width number in the reader's order; the width is inferred
/// from the target type.
macro_rules! read_ordered {
    ($input:expr, $ty:ty) => {{
        let raw = $input.read_array()?;
        Ok(match $input.byte_order() {
            ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
            ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
        })
    }};
}

/// Reading side of the wire codec.
///
/// Implementors provide raw byte access; every typed read is derived from it
/// and honors [`byte_order`](DataInput::byte_order).
pub trait DataInput {
    /// Order used for multi-byte values.
    fn byte_order(&self) -> ByteOrder;

    /// Consumes exactly `N` bytes.
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]>;

    /// Consumes `len` bytes into an owned buffer.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Reads one unsigned byte.
    fn read_u8(&mut self) -> Result<u8> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    /// Reads one signed byte.
    fn read_byte(&mut self) -> Result<i8> {
        read_ordered!(self, i8)
    }

    /// Any non-zero byte is `true`.
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads an `i16`.
    fn read_short(&mut self) -> Result<i16> {
        read_ordered!(self, i16)
    }

    /// Reads one UTF-16 code unit.
    fn read_char(&mut self) -> Result<u16> {
        read_ordered!(self, u16)
    }

    /// Reads an `i32`.
    fn read_int(&mut self) -> Result<i32> {
        read_ordered!(self, i32)
    }

    /// Reads an `i64`.
    fn read_long(&mut self) -> Result<i64> {
        read_ordered!(self, i64)
    }

    /// Reads an IEEE 754 `f32`.
    fn read_float(&mut self) -> Result<f32> {
        read_ordered!(self, f32)
    }

    /// Reads an IEEE 754 `f64`.
    fn read_double(&mut self) -> Result<f64> {
        read_ordered!(self, f64)
    }

    /// Reads an `i32` length followed by that many UTF-8 bytes. No type code.
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_int()?;
        let len = usize::try_from(len)
            .map_err(|_| IgniteError::Serialization(format!("negative string length {}", len)))?;
        String::from_utf8(self.read_bytes(len)?)
            .map_err(|e| IgniteError::Serialization(format!("string is not UTF-8: {}", e)))
    }
}

/// Cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ObjectDataInput<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> ObjectDataInput<'a> {
    /// Little-endian reader starting at offset zero.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_order(data, ByteOrder::LittleEndian)
    }

    /// Reader over `data` in the given byte order.
    pub fn with_order(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, pos: 0, order }
    }

    /// Byte order of this reader.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Seeks to an absolute offset. The end of the buffer is a valid target.
    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(IgniteError::Serialization(format!(
                "cannot seek to {} in a {}-byte body",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// The whole body, regardless of how much has been read.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Next byte without advancing.
    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure_remaining(1)?;
        Ok(self.data[self.pos])
    }

    /// Advances past `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Reads an `i32` length and rejects negative values.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_int()?;
        usize::try_from(len)
            .map_err(|_| IgniteError::Serialization(format!("negative length: {}", len)))
    }

    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(IgniteError::Serialization(format!(
                "truncated body: wanted {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure_remaining(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }
}

impl DataInput for ObjectDataInput<'_> {
    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.take(len).map(<[u8]>::to_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_reader() {
        let input = ObjectDataInput::new(&[1, 2, 3, 4]);
        assert_eq!(input.remaining(), 4);
        assert_eq!(input.position(), 0);
        assert_eq!(input.byte_order(), ByteOrder::LittleEndian);
    }

    #[test]
    fn test_signed_byte() {
        let mut input = ObjectDataInput::new(&[0xFF, 0x80]);
        assert_eq!(input.read_byte().unwrap(), -1);
        assert_eq!(input.read_byte().unwrap(), i8::MIN);
    }

    #[test]
    fn test_bool_treats_any_nonzero_as_true() {
        let mut input = ObjectDataInput::new(&[42, 0]);
        assert!(input.read_bool().unwrap());
        assert!(!input.read_bool().unwrap());
    }

    #[test]
    fn test_int_in_both_orders() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(ObjectDataInput::new(&data).read_int().unwrap(), 0x0403_0201);
        let mut be = ObjectDataInput::with_order(&data, ByteOrder::BigEndian);
        assert_eq!(be.read_int().unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_mixed_widths_advance_position() {
        let mut input = ObjectDataInput::new(&[0x34, 0x12, 8, 7, 6, 5, 4, 3, 2, 1, 0x41, 0x00]);
        assert_eq!(input.read_short().unwrap(), 0x1234);
        assert_eq!(input.read_long().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(input.read_char().unwrap(), u16::from(b'A'));
        assert_eq!(input.position(), 12);
    }

    #[test]
    fn test_double() {
        let bytes = 2.5f64.to_le_bytes();
        assert_eq!(ObjectDataInput::new(&bytes).read_double().unwrap(), 2.5);
    }

    #[test]
    fn test_truncated_read_does_not_advance() {
        let mut input = ObjectDataInput::new(&[1, 2]);
        let err = input.read_int().unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert_eq!(input.position(), 0);
        assert_eq!(input.read_short().unwrap(), 0x0201);
    }

    #[test]
    fn test_string() {
        let mut input = ObjectDataInput::new(&[3, 0, 0, 0, b'a', b'b', b'c']);
        assert_eq!(input.read_string().unwrap(), "abc");
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_string_with_negative_length() {
        let mut input = ObjectDataInput::new(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(input.read_string().is_err());
    }

    #[test]
    fn test_string_with_bad_utf8() {
        let mut input = ObjectDataInput::new(&[1, 0, 0, 0, 0xFF]);
        assert!(input.read_string().is_err());
    }

    #[test]
    fn test_peek_seek_and_skip() {
        let mut input = ObjectDataInput::new(&[9, 8, 7]);
        assert_eq!(input.peek_u8().unwrap(), 9);
        assert_eq!(input.position(), 0);
        input.skip(1).unwrap();
        assert_eq!(input.read_u8().unwrap(), 8);
        input.set_position(3).unwrap();
        assert!(input.peek_u8().is_err());
        assert!(input.set_position(4).is_err());
        assert!(input.skip(1).is_err());
    }
}
