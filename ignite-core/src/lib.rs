//! Core types and protocols for the Apache Ignite thin client.

#![warn(missing_docs)]

pub mod error;
pub mod partition;
pub mod protocol;
pub mod serialization;

pub use error::{ErrorKind, IgniteError, Result};
pub use serialization::{
    ByteOrder, ComplexObject, ComplexType, DataInput, DataOutput, Deserializable,
    FieldDescriptor, ObjectDataInput, ObjectDataOutput, Serializable, TypeCode, WireValue,
};
