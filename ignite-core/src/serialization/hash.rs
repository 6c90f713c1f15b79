//! Hash codes and identifiers that must agree with the server.
//!
//! Every routine here mirrors the server's `hashCode` semantics. The codec
//! uses [`bytes_hash`] to stamp complex objects and the topology tracker uses
//! an [`AffinityHasher`] to place keys; both reach the same functions.

use std::fmt;

use super::decimal::decimal_hash;
use super::type_codes::CollectionKind;
use super::WireValue;
use crate::error::Result;

/// FNV-1 offset basis used for schema identifiers.
pub const FNV1_OFFSET_BASIS: i32 = 0x811C_9DC5_u32 as i32;
/// FNV-1 prime used for schema identifiers.
pub const FNV1_PRIME: i32 = 0x0100_0193;

/// `String.hashCode` over UTF-16 code units.
pub fn java_string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

/// Identifier of a cache, derived from its exact name.
pub fn cache_id(name: &str) -> i32 {
    java_string_hash(name)
}

/// Identifier of a type or field, derived from its lowercased name.
pub fn entity_id(name: &str) -> i32 {
    java_string_hash(&name.to_lowercase())
}

/// FNV-1 over the little-endian bytes of each field id; 0 for no fields.
pub fn schema_id(field_ids: &[i32]) -> i32 {
    if field_ids.is_empty() {
        return 0;
    }
    field_ids.iter().fold(FNV1_OFFSET_BASIS, |acc, id| {
        id.to_le_bytes().iter().fold(acc, |h, b| {
            (h ^ i32::from(*b)).wrapping_mul(FNV1_PRIME)
        })
    })
}

/// `Arrays.hashCode(byte[])` over signed bytes.
pub fn bytes_hash(bytes: &[u8]) -> i32 {
    bytes
        .iter()
        .fold(1i32, |h, b| h.wrapping_mul(31).wrapping_add(i32::from(*b as i8)))
}

/// `Long.hashCode`.
pub fn long_hash(value: i64) -> i32 {
    (value ^ ((value as u64) >> 32) as i64) as i32
}

/// `Float.hashCode`, with NaN canonicalised.
pub fn float_hash(value: f32) -> i32 {
    if value.is_nan() {
        0x7fc0_0000
    } else {
        value.to_bits() as i32
    }
}

/// `Double.hashCode`, with NaN canonicalised.
pub fn double_hash(value: f64) -> i32 {
    let bits = if value.is_nan() {
        0x7ff8_0000_0000_0000_i64
    } else {
        value.to_bits() as i64
    };
    long_hash(bits)
}

/// `Boolean.hashCode`.
pub fn bool_hash(value: bool) -> i32 {
    if value {
        1231
    } else {
        1237
    }
}

/// `UUID.hashCode`.
pub fn uuid_hash(value: &uuid::Uuid) -> i32 {
    let (msb, lsb) = value.as_u64_pair();
    let hilo = (msb ^ lsb) as i64;
    ((hilo >> 32) as i32) ^ (hilo as i32)
}

fn ordered_hash<I: IntoIterator<Item = i32>>(items: I) -> i32 {
    items
        .into_iter()
        .fold(1i32, |h, e| h.wrapping_mul(31).wrapping_add(e))
}

/// Computes the hash code the server assigns to a key.
///
/// The default [`JavaHasher`] is the only implementation shipped; the trait
/// exists so the routine can be replaced without touching the router.
pub trait AffinityHasher: Send + Sync + fmt::Debug {
    /// Returns the hash code of `value`.
    fn hash_code(&self, value: &WireValue) -> Result<i32>;
}

/// Server-compatible hashing following Java `hashCode` conventions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaHasher;

impl AffinityHasher for JavaHasher {
    fn hash_code(&self, value: &WireValue) -> Result<i32> {
        Ok(match value {
            WireValue::Null => 0,
            WireValue::Byte(v) => i32::from(*v),
            WireValue::Short(v) => i32::from(*v),
            WireValue::Int(v) => *v,
            WireValue::Long(v) => long_hash(*v),
            WireValue::Float(v) => float_hash(*v),
            WireValue::Double(v) => double_hash(*v),
            WireValue::Char(v) => i32::from(*v),
            WireValue::Bool(v) => bool_hash(*v),
            WireValue::String(v) => java_string_hash(v),
            WireValue::Uuid(v) => uuid_hash(v),
            WireValue::Date(v) => long_hash(v.millis()),
            WireValue::Timestamp(v) => long_hash(v.millis()),
            WireValue::Time(v) => long_hash(v.millis()),
            WireValue::Decimal(v) => decimal_hash(v),
            WireValue::ByteArray(v) => bytes_hash(v),
            WireValue::ShortArray(v) => ordered_hash(v.iter().map(|e| i32::from(*e))),
            WireValue::IntArray(v) => ordered_hash(v.iter().copied()),
            WireValue::LongArray(v) => ordered_hash(v.iter().map(|e| long_hash(*e))),
            WireValue::FloatArray(v) => ordered_hash(v.iter().map(|e| float_hash(*e))),
            WireValue::DoubleArray(v) => ordered_hash(v.iter().map(|e| double_hash(*e))),
            WireValue::CharArray(v) => ordered_hash(v.iter().map(|e| i32::from(*e))),
            WireValue::BoolArray(v) => ordered_hash(v.iter().map(|e| bool_hash(*e))),
            WireValue::StringArray(v) => {
                ordered_hash(v.iter().map(|e| e.as_deref().map_or(0, java_string_hash)))
            }
            WireValue::UuidArray(v) => ordered_hash(v.iter().map(|e| e.as_ref().map_or(0, uuid_hash))),
            WireValue::DateArray(v) => {
                ordered_hash(v.iter().map(|e| e.map_or(0, |d| long_hash(d.millis()))))
            }
            WireValue::TimestampArray(v) => {
                ordered_hash(v.iter().map(|e| e.map_or(0, |d| long_hash(d.millis()))))
            }
            WireValue::TimeArray(v) => {
                ordered_hash(v.iter().map(|e| e.map_or(0, |d| long_hash(d.millis()))))
            }
            WireValue::DecimalArray(v) => {
                ordered_hash(v.iter().map(|e| e.as_ref().map_or(0, decimal_hash)))
            }
            WireValue::ObjectArray { items, .. } => {
                let hashes = items
                    .iter()
                    .map(|e| self.hash_code(e))
                    .collect::<Result<Vec<_>>>()?;
                ordered_hash(hashes)
            }
            WireValue::Collection { kind, items } => {
                let hashes = items
                    .iter()
                    .map(|e| self.hash_code(e))
                    .collect::<Result<Vec<_>>>()?;
                match kind {
                    CollectionKind::HashSet
                    | CollectionKind::LinkedHashSet
                    | CollectionKind::UserSet => {
                        hashes.into_iter().fold(0i32, |h, e| h.wrapping_add(e))
                    }
                    _ => ordered_hash(hashes),
                }
            }
            WireValue::Map { entries, .. } => {
                let mut sum = 0i32;
                for (k, v) in entries {
                    sum = sum.wrapping_add(self.hash_code(k)? ^ self.hash_code(v)?);
                }
                sum
            }
            WireValue::Enum(e) | WireValue::BinaryEnum(e) => {
                e.type_id.wrapping_mul(31).wrapping_add(e.ordinal)
            }
            WireValue::EnumArray { items, .. } => ordered_hash(items.iter().map(|e| {
                e.map_or(0, |e| e.type_id.wrapping_mul(31).wrapping_add(e.ordinal))
            })),
            WireValue::Complex(obj) => obj.hash_code(),
        })
    }
}

impl WireValue {
    /// Returns the server-compatible hash code of this value.
    pub fn hash_code(&self) -> Result<i32> {
        JavaHasher.hash_code(self)
    }
}
