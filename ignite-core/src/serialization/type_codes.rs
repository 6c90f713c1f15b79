//! Type codes prefixing every value on the wire.

use crate::error::{IgniteError, Result};

/// The one-byte tag written before each typed value.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    Char = 7,
    Bool = 8,
    String = 9,
    Uuid = 10,
    Date = 11,
    ByteArray = 12,
    ShortArray = 13,
    IntArray = 14,
    LongArray = 15,
    FloatArray = 16,
    DoubleArray = 17,
    CharArray = 18,
    BoolArray = 19,
    StringArray = 20,
    UuidArray = 21,
    DateArray = 22,
    ObjectArray = 23,
    Collection = 24,
    Map = 25,
    WrappedBinary = 27,
    Enum = 28,
    EnumArray = 29,
    Decimal = 30,
    DecimalArray = 31,
    Timestamp = 33,
    TimestampArray = 34,
    Time = 36,
    TimeArray = 37,
    BinaryEnum = 38,
    Null = 101,
    Handle = 102,
    Complex = 103,
}

impl TypeCode {
    /// Returns the wire tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire tag.
    pub fn from_u8(code: u8) -> Result<Self> {
        let code = match code {
            1 => Self::Byte,
            2 => Self::Short,
            3 => Self::Int,
            4 => Self::Long,
            5 => Self::Float,
            6 => Self::Double,
            7 => Self::Char,
            8 => Self::Bool,
            9 => Self::String,
            10 => Self::Uuid,
            11 => Self::Date,
            12 => Self::ByteArray,
            13 => Self::ShortArray,
            14 => Self::IntArray,
            15 => Self::LongArray,
            16 => Self::FloatArray,
            17 => Self::DoubleArray,
            18 => Self::CharArray,
            19 => Self::BoolArray,
            20 => Self::StringArray,
            21 => Self::UuidArray,
            22 => Self::DateArray,
            23 => Self::ObjectArray,
            24 => Self::Collection,
            25 => Self::Map,
            27 => Self::WrappedBinary,
            28 => Self::Enum,
            29 => Self::EnumArray,
            30 => Self::Decimal,
            31 => Self::DecimalArray,
            33 => Self::Timestamp,
            34 => Self::TimestampArray,
            36 => Self::Time,
            37 => Self::TimeArray,
            38 => Self::BinaryEnum,
            101 => Self::Null,
            102 => Self::Handle,
            103 => Self::Complex,
            other => {
                return Err(IgniteError::Serialization(format!(
                    "unknown type code: {}",
                    other
                )))
            }
        };
        Ok(code)
    }
}

/// Collection flavour carried after the collection type code.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    UserSet,
    UserCollection,
    ArrayList,
    LinkedList,
    HashSet,
    LinkedHashSet,
    SingletonList,
}

impl CollectionKind {
    /// Returns the wire tag.
    pub fn as_i8(self) -> i8 {
        match self {
            Self::UserSet => -1,
            Self::UserCollection => 0,
            Self::ArrayList => 1,
            Self::LinkedList => 2,
            Self::HashSet => 3,
            Self::LinkedHashSet => 4,
            Self::SingletonList => 5,
        }
    }

    /// Parses a wire tag.
    pub fn from_i8(tag: i8) -> Result<Self> {
        Ok(match tag {
            -1 => Self::UserSet,
            0 => Self::UserCollection,
            1 => Self::ArrayList,
            2 => Self::LinkedList,
            3 => Self::HashSet,
            4 => Self::LinkedHashSet,
            5 => Self::SingletonList,
            other => {
                return Err(IgniteError::Serialization(format!(
                    "unknown collection kind: {}",
                    other
                )))
            }
        })
    }
}

/// Map flavour carried after the map type code.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    HashMap,
    LinkedHashMap,
}

impl MapKind {
    /// Returns the wire tag.
    pub fn as_i8(self) -> i8 {
        match self {
            Self::HashMap => 1,
            Self::LinkedHashMap => 2,
        }
    }

    /// Parses a wire tag.
    pub fn from_i8(tag: i8) -> Result<Self> {
        match tag {
            1 => Ok(Self::HashMap),
            2 => Ok(Self::LinkedHashMap),
            other => Err(IgniteError::Serialization(format!(
                "unknown map kind: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_code_round_trip_all_known() {
        for code in 0u8..=255 {
            if let Ok(parsed) = TypeCode::from_u8(code) {
                assert_eq!(parsed.as_u8(), code);
            }
        }
    }

    #[test]
    fn test_unknown_type_code() {
        assert!(TypeCode::from_u8(26).is_err());
        assert!(TypeCode::from_u8(0).is_err());
    }

    #[test]
    fn test_collection_kind_tags() {
        assert_eq!(CollectionKind::UserSet.as_i8(), -1);
        assert_eq!(
            CollectionKind::from_i8(1).unwrap(),
            CollectionKind::ArrayList
        );
        assert!(CollectionKind::from_i8(9).is_err());
    }

    #[test]
    fn test_map_kind_tags() {
        assert_eq!(MapKind::from_i8(2).unwrap(), MapKind::LinkedHashMap);
        assert!(MapKind::from_i8(0).is_err());
    }
}
