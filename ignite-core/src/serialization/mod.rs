//! Binary codec for the thin client wire format.

mod byte_order;
pub mod complex;
mod data_input;
mod data_output;
pub mod decimal;
pub mod hash;
mod temporal;
mod traits;
mod type_codes;
mod value;

pub use byte_order::ByteOrder;
pub use complex::{ComplexObject, ComplexType, ComplexTypeBuilder, FieldDescriptor, ObjectBuilder};
pub use data_input::{DataInput, ObjectDataInput};
pub use data_output::{DataOutput, ObjectDataOutput};
pub use hash::{AffinityHasher, JavaHasher};
pub use temporal::{Date, Time, Timestamp};
pub use traits::{Deserializable, Serializable};
pub use type_codes::{CollectionKind, MapKind, TypeCode};
pub use value::{EnumValue, WireValue, MAX_NESTING_DEPTH, OBJECT_ARRAY_TYPE_ID};
