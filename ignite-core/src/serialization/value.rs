//! The tagged value type and its canonical wire encoding.

use bytes::Bytes;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::complex::ComplexObject;
use super::decimal::{read_decimal, write_decimal};
use super::temporal::{Date, Time, Timestamp};
use super::type_codes::{CollectionKind, MapKind, TypeCode};
use super::{ByteOrder, DataInput, DataOutput, ObjectDataInput, ObjectDataOutput};
use crate::error::{IgniteError, Result};

/// Type id written for untyped object arrays.
pub const OBJECT_ARRAY_TYPE_ID: i32 = -1;

/// Deepest container nesting accepted when decoding.
pub const MAX_NESTING_DEPTH: usize = 256;

/// An enum constant identified by its type and ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumValue {
    /// Registered enum type id.
    pub type_id: i32,
    /// Ordinal of the constant.
    pub ordinal: i32,
}

/// A value of any type the protocol can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Absent value.
    Null,
    /// Signed 8-bit integer.
    Byte(i8),
    /// Signed 16-bit integer.
    Short(i16),
    /// Signed 32-bit integer.
    Int(i32),
    /// Signed 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-16 code unit.
    Char(u16),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// 128-bit identifier.
    Uuid(Uuid),
    /// Date with millisecond precision.
    Date(Date),
    /// Timestamp with nanosecond precision.
    Timestamp(Timestamp),
    /// Time of day.
    Time(Time),
    /// Decimal number.
    Decimal(Decimal),
    /// Byte array.
    ByteArray(Vec<u8>),
    /// Short array.
    ShortArray(Vec<i16>),
    /// Int array.
    IntArray(Vec<i32>),
    /// Long array.
    LongArray(Vec<i64>),
    /// Float array.
    FloatArray(Vec<f32>),
    /// Double array.
    DoubleArray(Vec<f64>),
    /// Char array.
    CharArray(Vec<u16>),
    /// Bool array.
    BoolArray(Vec<bool>),
    /// String array with nullable elements.
    StringArray(Vec<Option<String>>),
    /// UUID array with nullable elements.
    UuidArray(Vec<Option<Uuid>>),
    /// Date array with nullable elements.
    DateArray(Vec<Option<Date>>),
    /// Timestamp array with nullable elements.
    TimestampArray(Vec<Option<Timestamp>>),
    /// Time array with nullable elements.
    TimeArray(Vec<Option<Time>>),
    /// Decimal array with nullable elements.
    DecimalArray(Vec<Option<Decimal>>),
    /// Array of arbitrary values with a component type id.
    ObjectArray {
        /// Component type id, [`OBJECT_ARRAY_TYPE_ID`] when untyped.
        type_id: i32,
        /// Elements.
        items: Vec<WireValue>,
    },
    /// List or set of arbitrary values.
    Collection {
        /// Collection flavour.
        kind: CollectionKind,
        /// Elements.
        items: Vec<WireValue>,
    },
    /// Key/value map.
    Map {
        /// Map flavour.
        kind: MapKind,
        /// Entries in wire order.
        entries: Vec<(WireValue, WireValue)>,
    },
    /// Enum constant.
    Enum(EnumValue),
    /// Enum constant in binary form.
    BinaryEnum(EnumValue),
    /// Array of enum constants.
    EnumArray {
        /// Component enum type id.
        type_id: i32,
        /// Elements.
        items: Vec<Option<EnumValue>>,
    },
    /// Structured object with a schema.
    Complex(ComplexObject),
}

fn len_i32(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| IgniteError::Serialization(format!("length {} exceeds i32::MAX", len)))
}

fn write_uuid(out: &mut ObjectDataOutput, value: &Uuid) -> Result<()> {
    let (msb, lsb) = value.as_u64_pair();
    out.write_long(msb as i64)?;
    out.write_long(lsb as i64)
}

fn read_uuid(input: &mut ObjectDataInput<'_>) -> Result<Uuid> {
    let msb = input.read_long()? as u64;
    let lsb = input.read_long()? as u64;
    Ok(Uuid::from_u64_pair(msb, lsb))
}

fn write_timestamp(out: &mut ObjectDataOutput, value: &Timestamp) -> Result<()> {
    out.write_long(value.millis())?;
    out.write_int(value.nanos())
}

fn read_timestamp(input: &mut ObjectDataInput<'_>) -> Result<Timestamp> {
    let millis = input.read_long()?;
    let nanos = input.read_int()?;
    Timestamp::new(millis, nanos)
}

fn write_enum(out: &mut ObjectDataOutput, code: TypeCode, value: &EnumValue) -> Result<()> {
    out.write_u8(code.as_u8())?;
    out.write_int(value.type_id)?;
    out.write_int(value.ordinal)
}

fn write_nullable<T>(
    out: &mut ObjectDataOutput,
    items: &[Option<T>],
    mut write: impl FnMut(&mut ObjectDataOutput, &T) -> Result<()>,
) -> Result<()> {
    out.write_int(len_i32(items.len())?)?;
    for item in items {
        match item {
            Some(v) => write(out, v)?,
            None => out.write_u8(TypeCode::Null.as_u8())?,
        }
    }
    Ok(())
}

fn read_nullable<T>(
    input: &mut ObjectDataInput<'_>,
    expected: TypeCode,
    mut read: impl FnMut(&mut ObjectDataInput<'_>) -> Result<T>,
) -> Result<Vec<Option<T>>> {
    let len = input.read_len()?;
    let mut items = Vec::with_capacity(len.min(input.remaining()));
    for _ in 0..len {
        let code = TypeCode::from_u8(input.read_u8()?)?;
        if code == TypeCode::Null {
            items.push(None);
        } else if code == expected {
            items.push(Some(read(input)?));
        } else {
            return Err(IgniteError::Serialization(format!(
                "expected {:?} array element, found {:?}",
                expected, code
            )));
        }
    }
    Ok(items)
}

fn read_array<T>(
    input: &mut ObjectDataInput<'_>,
    mut read: impl FnMut(&mut ObjectDataInput<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let len = input.read_len()?;
    let mut items = Vec::with_capacity(len.min(input.remaining()));
    for _ in 0..len {
        items.push(read(input)?);
    }
    Ok(items)
}

impl WireValue {
    /// Returns the type code this value is written with.
    pub fn type_code(&self) -> TypeCode {
        match self {
            Self::Null => TypeCode::Null,
            Self::Byte(_) => TypeCode::Byte,
            Self::Short(_) => TypeCode::Short,
            Self::Int(_) => TypeCode::Int,
            Self::Long(_) => TypeCode::Long,
            Self::Float(_) => TypeCode::Float,
            Self::Double(_) => TypeCode::Double,
            Self::Char(_) => TypeCode::Char,
            Self::Bool(_) => TypeCode::Bool,
            Self::String(_) => TypeCode::String,
            Self::Uuid(_) => TypeCode::Uuid,
            Self::Date(_) => TypeCode::Date,
            Self::Timestamp(_) => TypeCode::Timestamp,
            Self::Time(_) => TypeCode::Time,
            Self::Decimal(_) => TypeCode::Decimal,
            Self::ByteArray(_) => TypeCode::ByteArray,
            Self::ShortArray(_) => TypeCode::ShortArray,
            Self::IntArray(_) => TypeCode::IntArray,
            Self::LongArray(_) => TypeCode::LongArray,
            Self::FloatArray(_) => TypeCode::FloatArray,
            Self::DoubleArray(_) => TypeCode::DoubleArray,
            Self::CharArray(_) => TypeCode::CharArray,
            Self::BoolArray(_) => TypeCode::BoolArray,
            Self::StringArray(_) => TypeCode::StringArray,
            Self::UuidArray(_) => TypeCode::UuidArray,
            Self::DateArray(_) => TypeCode::DateArray,
            Self::TimestampArray(_) => TypeCode::TimestampArray,
            Self::TimeArray(_) => TypeCode::TimeArray,
            Self::DecimalArray(_) => TypeCode::DecimalArray,
            Self::ObjectArray { .. } => TypeCode::ObjectArray,
            Self::Collection { .. } => TypeCode::Collection,
            Self::Map { .. } => TypeCode::Map,
            Self::Enum(_) => TypeCode::Enum,
            Self::BinaryEnum(_) => TypeCode::BinaryEnum,
            Self::EnumArray { .. } => TypeCode::EnumArray,
            Self::Complex(_) => TypeCode::Complex,
        }
    }

    /// Returns true for [`WireValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Encodes this value with its type code.
    pub fn encode(&self, order: ByteOrder) -> Result<Bytes> {
        let mut out = ObjectDataOutput::with_order(order);
        self.write_to(&mut out)?;
        Ok(out.freeze())
    }

    /// Decodes exactly one value occupying all of `data`.
    pub fn decode(data: &[u8], order: ByteOrder) -> Result<Self> {
        let mut input = ObjectDataInput::with_order(data, order);
        let value = Self::read_from(&mut input)?;
        if input.remaining() != 0 {
            return Err(IgniteError::Serialization(format!(
                "{} trailing bytes after value",
                input.remaining()
            )));
        }
        Ok(value)
    }

    /// Writes the type code followed by the value body.
    pub fn write_to(&self, out: &mut ObjectDataOutput) -> Result<()> {
        if let Self::Complex(obj) = self {
            return obj.write_to(out);
        }
        if let Self::Enum(e) = self {
            return write_enum(out, TypeCode::Enum, e);
        }
        if let Self::BinaryEnum(e) = self {
            return write_enum(out, TypeCode::BinaryEnum, e);
        }

        out.write_u8(self.type_code().as_u8())?;
        match self {
            Self::Null => {}
            Self::Byte(v) => out.write_byte(*v)?,
            Self::Short(v) => out.write_short(*v)?,
            Self::Int(v) => out.write_int(*v)?,
            Self::Long(v) => out.write_long(*v)?,
            Self::Float(v) => out.write_float(*v)?,
            Self::Double(v) => out.write_double(*v)?,
            Self::Char(v) => out.write_char(*v)?,
            Self::Bool(v) => out.write_bool(*v)?,
            Self::String(v) => out.write_string(v)?,
            Self::Uuid(v) => write_uuid(out, v)?,
            Self::Date(v) => out.write_long(v.millis())?,
            Self::Timestamp(v) => write_timestamp(out, v)?,
            Self::Time(v) => out.write_long(v.millis())?,
            Self::Decimal(v) => write_decimal(out, v)?,
            Self::ByteArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                out.write_bytes(v)?;
            }
            Self::ShortArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                for e in v {
                    out.write_short(*e)?;
                }
            }
            Self::IntArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                for e in v {
                    out.write_int(*e)?;
                }
            }
            Self::LongArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                for e in v {
                    out.write_long(*e)?;
                }
            }
            Self::FloatArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                for e in v {
                    out.write_float(*e)?;
                }
            }
            Self::DoubleArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                for e in v {
                    out.write_double(*e)?;
                }
            }
            Self::CharArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                for e in v {
                    out.write_char(*e)?;
                }
            }
            Self::BoolArray(v) => {
                out.write_int(len_i32(v.len())?)?;
                for e in v {
                    out.write_bool(*e)?;
                }
            }
            Self::StringArray(v) => write_nullable(out, v, |out, s| {
                out.write_u8(TypeCode::String.as_u8())?;
                out.write_string(s)
            })?,
            Self::UuidArray(v) => write_nullable(out, v, |out, u| {
                out.write_u8(TypeCode::Uuid.as_u8())?;
                write_uuid(out, u)
            })?,
            Self::DateArray(v) => write_nullable(out, v, |out, d| {
                out.write_u8(TypeCode::Date.as_u8())?;
                out.write_long(d.millis())
            })?,
            Self::TimestampArray(v) => write_nullable(out, v, |out, t| {
                out.write_u8(TypeCode::Timestamp.as_u8())?;
                write_timestamp(out, t)
            })?,
            Self::TimeArray(v) => write_nullable(out, v, |out, t| {
                out.write_u8(TypeCode::Time.as_u8())?;
                out.write_long(t.millis())
            })?,
            Self::DecimalArray(v) => write_nullable(out, v, |out, d| {
                out.write_u8(TypeCode::Decimal.as_u8())?;
                write_decimal(out, d)
            })?,
            Self::ObjectArray { type_id, items } => {
                out.write_int(*type_id)?;
                out.write_int(len_i32(items.len())?)?;
                for item in items {
                    item.write_to(out)?;
                }
            }
            Self::Collection { kind, items } => {
                out.write_int(len_i32(items.len())?)?;
                out.write_byte(kind.as_i8())?;
                for item in items {
                    item.write_to(out)?;
                }
            }
            Self::Map { kind, entries } => {
                out.write_int(len_i32(entries.len())?)?;
                out.write_byte(kind.as_i8())?;
                for (k, v) in entries {
                    k.write_to(out)?;
                    v.write_to(out)?;
                }
            }
            Self::EnumArray { type_id, items } => {
                out.write_int(*type_id)?;
                write_nullable(out, items, |out, e| write_enum(out, TypeCode::Enum, e))?;
            }
            Self::Enum(_) | Self::BinaryEnum(_) | Self::Complex(_) => {}
        }
        Ok(())
    }

    /// Reads one typed value starting at the current position.
    ///
    /// Containers may nest at most [`MAX_NESTING_DEPTH`] levels deep.
    pub fn read_from(input: &mut ObjectDataInput<'_>) -> Result<Self> {
        Self::read_nested(input, 0)
    }

    fn read_nested(input: &mut ObjectDataInput<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_NESTING_DEPTH {
            return Err(IgniteError::Serialization(format!(
                "value nested deeper than {} levels at offset {}",
                MAX_NESTING_DEPTH,
                input.position()
            )));
        }
        let code = TypeCode::from_u8(input.peek_u8()?)?;
        if code == TypeCode::Complex {
            return ComplexObject::read_from(input).map(Self::Complex);
        }
        input.skip(1)?;

        let value = match code {
            TypeCode::Null => Self::Null,
            TypeCode::Byte => Self::Byte(input.read_byte()?),
            TypeCode::Short => Self::Short(input.read_short()?),
            TypeCode::Int => Self::Int(input.read_int()?),
            TypeCode::Long => Self::Long(input.read_long()?),
            TypeCode::Float => Self::Float(input.read_float()?),
            TypeCode::Double => Self::Double(input.read_double()?),
            TypeCode::Char => Self::Char(input.read_char()?),
            TypeCode::Bool => Self::Bool(input.read_bool()?),
            TypeCode::String => Self::String(input.read_string()?),
            TypeCode::Uuid => Self::Uuid(read_uuid(input)?),
            TypeCode::Date => Self::Date(Date::from_millis(input.read_long()?)),
            TypeCode::Timestamp => Self::Timestamp(read_timestamp(input)?),
            TypeCode::Time => Self::Time(Time::from_millis(input.read_long()?)?),
            TypeCode::Decimal => Self::Decimal(read_decimal(input)?),
            TypeCode::ByteArray => {
                let len = input.read_len()?;
                Self::ByteArray(input.read_bytes(len)?)
            }
            TypeCode::ShortArray => Self::ShortArray(read_array(input, |i| i.read_short())?),
            TypeCode::IntArray => Self::IntArray(read_array(input, |i| i.read_int())?),
            TypeCode::LongArray => Self::LongArray(read_array(input, |i| i.read_long())?),
            TypeCode::FloatArray => Self::FloatArray(read_array(input, |i| i.read_float())?),
            TypeCode::DoubleArray => Self::DoubleArray(read_array(input, |i| i.read_double())?),
            TypeCode::CharArray => Self::CharArray(read_array(input, |i| i.read_char())?),
            TypeCode::BoolArray => Self::BoolArray(read_array(input, |i| i.read_bool())?),
            TypeCode::StringArray => Self::StringArray(read_nullable(
                input,
                TypeCode::String,
                |i| i.read_string(),
            )?),
            TypeCode::UuidArray => {
                Self::UuidArray(read_nullable(input, TypeCode::Uuid, read_uuid)?)
            }
            TypeCode::DateArray => Self::DateArray(read_nullable(input, TypeCode::Date, |i| {
                Ok(Date::from_millis(i.read_long()?))
            })?),
            TypeCode::TimestampArray => Self::TimestampArray(read_nullable(
                input,
                TypeCode::Timestamp,
                read_timestamp,
            )?),
            TypeCode::TimeArray => Self::TimeArray(read_nullable(input, TypeCode::Time, |i| {
                Time::from_millis(i.read_long()?)
            })?),
            TypeCode::DecimalArray => {
                Self::DecimalArray(read_nullable(input, TypeCode::Decimal, read_decimal)?)
            }
            TypeCode::ObjectArray => {
                let type_id = input.read_int()?;
                let items = read_array(input, |i| Self::read_nested(i, depth + 1))?;
                Self::ObjectArray { type_id, items }
            }
            TypeCode::Collection => {
                let len = input.read_len()?;
                let kind = CollectionKind::from_i8(input.read_byte()?)?;
                let mut items = Vec::with_capacity(len.min(input.remaining()));
                for _ in 0..len {
                    items.push(Self::read_nested(input, depth + 1)?);
                }
                Self::Collection { kind, items }
            }
            TypeCode::Map => {
                let len = input.read_len()?;
                let kind = MapKind::from_i8(input.read_byte()?)?;
                let mut entries = Vec::with_capacity(len.min(input.remaining()));
                for _ in 0..len {
                    let k = Self::read_nested(input, depth + 1)?;
                    let v = Self::read_nested(input, depth + 1)?;
                    entries.push((k, v));
                }
                Self::Map { kind, entries }
            }
            TypeCode::Enum | TypeCode::BinaryEnum => {
                let e = EnumValue {
                    type_id: input.read_int()?,
                    ordinal: input.read_int()?,
                };
                if code == TypeCode::Enum {
                    Self::Enum(e)
                } else {
                    Self::BinaryEnum(e)
                }
            }
            TypeCode::EnumArray => {
                let type_id = input.read_int()?;
                let items = read_nullable(input, TypeCode::Enum, |i| {
                    Ok(EnumValue {
                        type_id: i.read_int()?,
                        ordinal: i.read_int()?,
                    })
                })?;
                Self::EnumArray { type_id, items }
            }
            TypeCode::WrappedBinary => read_wrapped(input, depth + 1)?,
            TypeCode::Handle => {
                return Err(IgniteError::Serialization(
                    "object handles are not supported".to_string(),
                ))
            }
            TypeCode::Complex => {
                return Err(IgniteError::Serialization(
                    "complex object header consumed out of order".to_string(),
                ))
            }
        };
        Ok(value)
    }
}

/// Unwraps `len:i32 | bytes | offset:i32` into the value at `offset`.
fn read_wrapped(input: &mut ObjectDataInput<'_>, depth: usize) -> Result<WireValue> {
    let len = input.read_len()?;
    let body = input.read_bytes(len)?;
    let offset = input.read_len()?;
    let mut inner = ObjectDataInput::with_order(&body, input.order());
    inner.set_position(offset)?;
    WireValue::read_nested(&mut inner, depth)
}
