//! Conversions between Rust values and [`WireValue`].

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::complex::ComplexObject;
use super::temporal::{Date, Time, Timestamp};
use super::type_codes::{MapKind, TypeCode};
use super::value::{EnumValue, WireValue};
use crate::error::{IgniteError, Result};

/// Trait for types that can be written as a typed wire value.
pub trait Serializable {
    /// Converts this value into its wire representation.
    fn to_wire(&self) -> Result<WireValue>;
}

/// Trait for types that can be produced from a typed wire value.
pub trait Deserializable: Sized {
    /// Converts a wire value into this type.
    fn from_wire(value: WireValue) -> Result<Self>;
}

fn mismatch<T>(expected: TypeCode, actual: &WireValue) -> Result<T> {
    Err(IgniteError::Serialization(format!(
        "expected {:?}, got {:?}",
        expected,
        actual.type_code()
    )))
}

macro_rules! wire_conversion {
    ($ty:ty, $variant:ident, $code:ident) => {
        impl Serializable for $ty {
            fn to_wire(&self) -> Result<WireValue> {
                Ok(WireValue::$variant(self.clone()))
            }
        }

        impl Deserializable for $ty {
            fn from_wire(value: WireValue) -> Result<Self> {
                match value {
                    WireValue::$variant(v) => Ok(v),
                    other => mismatch(TypeCode::$code, &other),
                }
            }
        }
    };
}

wire_conversion!(i8, Byte, Byte);
wire_conversion!(i16, Short, Short);
wire_conversion!(i32, Int, Int);
wire_conversion!(i64, Long, Long);
wire_conversion!(f32, Float, Float);
wire_conversion!(f64, Double, Double);
wire_conversion!(u16, Char, Char);
wire_conversion!(bool, Bool, Bool);
wire_conversion!(String, String, String);
wire_conversion!(Uuid, Uuid, Uuid);
wire_conversion!(Decimal, Decimal, Decimal);
wire_conversion!(Date, Date, Date);
wire_conversion!(Timestamp, Timestamp, Timestamp);
wire_conversion!(Time, Time, Time);
wire_conversion!(Vec<u8>, ByteArray, ByteArray);
wire_conversion!(Vec<i32>, IntArray, IntArray);
wire_conversion!(Vec<i64>, LongArray, LongArray);
wire_conversion!(Vec<Option<String>>, StringArray, StringArray);
wire_conversion!(ComplexObject, Complex, Complex);

impl Serializable for str {
    fn to_wire(&self) -> Result<WireValue> {
        Ok(WireValue::String(self.to_string()))
    }
}

impl Serializable for [u8] {
    fn to_wire(&self) -> Result<WireValue> {
        Ok(WireValue::ByteArray(self.to_vec()))
    }
}

impl<T: Serializable + ?Sized> Serializable for &T {
    fn to_wire(&self) -> Result<WireValue> {
        (**self).to_wire()
    }
}

impl Serializable for WireValue {
    fn to_wire(&self) -> Result<WireValue> {
        Ok(self.clone())
    }
}

impl Deserializable for WireValue {
    fn from_wire(value: WireValue) -> Result<Self> {
        Ok(value)
    }
}

impl Serializable for EnumValue {
    fn to_wire(&self) -> Result<WireValue> {
        Ok(WireValue::BinaryEnum(*self))
    }
}

impl Deserializable for EnumValue {
    fn from_wire(value: WireValue) -> Result<Self> {
        match value {
            WireValue::Enum(e) | WireValue::BinaryEnum(e) => Ok(e),
            other => mismatch(TypeCode::BinaryEnum, &other),
        }
    }
}

// ============================================================================
// chrono types
// ============================================================================

impl Serializable for DateTime<Utc> {
    fn to_wire(&self) -> Result<WireValue> {
        Ok(WireValue::Timestamp(Timestamp::from(*self)))
    }
}

impl Deserializable for DateTime<Utc> {
    fn from_wire(value: WireValue) -> Result<Self> {
        let converted = match &value {
            WireValue::Timestamp(ts) => ts.to_datetime(),
            WireValue::Date(d) => d.to_datetime(),
            _ => return mismatch(TypeCode::Timestamp, &value),
        };
        converted.ok_or_else(|| {
            IgniteError::Serialization("date-time outside the representable range".to_string())
        })
    }
}

impl Serializable for NaiveTime {
    fn to_wire(&self) -> Result<WireValue> {
        Ok(WireValue::Time(Time::from(*self)))
    }
}

impl Deserializable for NaiveTime {
    fn from_wire(value: WireValue) -> Result<Self> {
        match value {
            WireValue::Time(t) => t.to_naive_time().ok_or_else(|| {
                IgniteError::Serialization(format!("invalid time of day {}ms", t.millis()))
            }),
            other => mismatch(TypeCode::Time, &other),
        }
    }
}

// ============================================================================
// Option<T> maps to the null value
// ============================================================================

impl<T: Serializable> Serializable for Option<T> {
    fn to_wire(&self) -> Result<WireValue> {
        match self {
            Some(value) => value.to_wire(),
            None => Ok(WireValue::Null),
        }
    }
}

impl<T: Deserializable> Deserializable for Option<T> {
    fn from_wire(value: WireValue) -> Result<Self> {
        match value {
            WireValue::Null => Ok(None),
            other => T::from_wire(other).map(Some),
        }
    }
}

impl<K: Serializable, V: Serializable> Serializable for HashMap<K, V> {
    fn to_wire(&self) -> Result<WireValue> {
        let entries = self
            .iter()
            .map(|(k, v)| Ok((k.to_wire()?, v.to_wire()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(WireValue::Map {
            kind: MapKind::HashMap,
            entries,
        })
    }
}

impl<K, V> Deserializable for HashMap<K, V>
where
    K: Deserializable + Eq + Hash,
    V: Deserializable,
{
    fn from_wire(value: WireValue) -> Result<Self> {
        match value {
            WireValue::Map { entries, .. } => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_wire(k)?, V::from_wire(v)?)))
                .collect(),
            other => mismatch(TypeCode::Map, &other),
        }
    }
}
