//! Byte order selection for the wire codec.

/// Byte order used for every multi-byte value in a frame.
///
/// Servers speak little-endian; big-endian exists for interoperability testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    LittleEndian,
    /// Most significant byte first.
    BigEndian,
}

impl ByteOrder {
    /// Returns true for little-endian.
    pub fn is_little_endian(self) -> bool {
        self == Self::LittleEndian
    }
}
