//! Complex (binary) objects and the schema builder that produces them.
//!
//! An object is laid out as a fixed header, the encoded field values, and a
//! footer mapping each field id to its offset from the start of the object.
//! The footer lets [`ComplexObject::field`] decode one field without touching
//! the others.
//!
//! Types are declared once with [`ComplexType::builder`] and reused to encode
//! any number of objects:
//!
//! ```
//! use ignite_core::serialization::{ByteOrder, ComplexType, TypeCode, WireValue};
//!
//! let person = ComplexType::builder("Person")
//!     .field("name", TypeCode::String)
//!     .field("age", TypeCode::Int)
//!     .build()
//!     .unwrap();
//!
//! let obj = person
//!     .encode(
//!         vec![WireValue::String("Ann".into()), WireValue::Int(41)],
//!         ByteOrder::LittleEndian,
//!     )
//!     .unwrap();
//! assert_eq!(obj.field_by_name("age").unwrap(), Some(WireValue::Int(41)));
//! ```

use std::collections::HashSet;

use bytes::Bytes;

use super::hash::{bytes_hash, entity_id, schema_id};
use super::type_codes::TypeCode;
use super::{ByteOrder, DataInput, DataOutput, ObjectDataInput, ObjectDataOutput, WireValue};
use crate::error::{IgniteError, Result};
use crate::Serializable;

/// Length of the fixed object header in bytes.
pub const HEADER_LEN: usize = 24;
/// Object layout version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Object belongs to a user type.
pub const FLAG_USER_TYPE: i16 = 0x0001;
/// Object carries a field footer.
pub const FLAG_HAS_SCHEMA: i16 = 0x0002;
/// Object carries raw (unnamed) data after the fields.
pub const FLAG_HAS_RAW_DATA: i16 = 0x0004;
/// Footer offsets are one byte wide.
pub const FLAG_OFFSET_ONE_BYTE: i16 = 0x0008;
/// Footer offsets are two bytes wide.
pub const FLAG_OFFSET_TWO_BYTES: i16 = 0x0010;
/// Footer omits field ids.
pub const FLAG_COMPACT_FOOTER: i16 = 0x0020;

const HEADER_FLAGS_POS: usize = 2;
const HEADER_TYPE_ID_POS: usize = 4;
const HEADER_HASH_POS: usize = 8;
const HEADER_LENGTH_POS: usize = 12;
const HEADER_SCHEMA_ID_POS: usize = 16;
const HEADER_SCHEMA_OFFSET_POS: usize = 20;

/// A declared field of a [`ComplexType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    id: i32,
    type_code: TypeCode,
}

impl FieldDescriptor {
    /// Describes a field with an id assigned elsewhere, such as by the server.
    pub fn new(name: impl Into<String>, id: i32, type_code: TypeCode) -> Self {
        Self {
            name: name.into(),
            id,
            type_code,
        }
    }

    /// Returns the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field id derived from the name.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the declared type code.
    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }
}

/// A registered object schema: type identity plus ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexType {
    name: String,
    type_id: i32,
    schema_id: i32,
    fields: Vec<FieldDescriptor>,
    affinity_key_field: Option<String>,
}

impl ComplexType {
    /// Starts declaring a type with the given name.
    pub fn builder(name: impl Into<String>) -> ComplexTypeBuilder {
        ComplexTypeBuilder::new(name)
    }

    /// Rebuilds a type from metadata the cluster reported, keeping its
    /// identifiers as given. Without a `schema_id` one is derived from the
    /// field ids.
    pub fn from_metadata(
        type_id: i32,
        name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
        affinity_key_field: Option<String>,
        schema_id: Option<i32>,
    ) -> Self {
        let schema_id = schema_id.unwrap_or_else(|| {
            let ids: Vec<i32> = fields.iter().map(|f| f.id).collect();
            super::hash::schema_id(&ids)
        });
        Self {
            name: name.into(),
            type_id,
            schema_id,
            fields,
            affinity_key_field,
        }
    }

    /// Returns the type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type id.
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Returns the schema id.
    pub fn schema_id(&self) -> i32 {
        self.schema_id
    }

    /// Returns the declared fields in layout order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Returns the affinity key field name, if declared.
    pub fn affinity_key_field(&self) -> Option<&str> {
        self.affinity_key_field.as_deref()
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        let id = entity_id(name);
        self.fields.iter().find(|f| f.id == id)
    }

    /// Encodes one object from values given in field order.
    ///
    /// Each value must match its declared type code or be null.
    pub fn encode(&self, values: Vec<WireValue>, order: ByteOrder) -> Result<ComplexObject> {
        if values.len() != self.fields.len() {
            return Err(IgniteError::Serialization(format!(
                "type {} declares {} fields, got {} values",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(&values) {
            if !value.is_null() && value.type_code() != field.type_code {
                return Err(IgniteError::Serialization(format!(
                    "field {}.{} is declared {:?} but got {:?}",
                    self.name,
                    field.name,
                    field.type_code,
                    value.type_code()
                )));
            }
        }
        let fields: Vec<(i32, WireValue)> = self
            .fields
            .iter()
            .map(|f| f.id)
            .zip(values)
            .collect();
        ComplexObject::from_fields(self.type_id, &fields, order)
    }

    /// Starts building an object whose fields are set by name.
    pub fn object(&self, order: ByteOrder) -> ObjectBuilder<'_> {
        ObjectBuilder {
            ty: self,
            values: vec![WireValue::Null; self.fields.len()],
            order,
        }
    }
}

/// Builder for [`ComplexType`].
#[derive(Debug, Clone)]
pub struct ComplexTypeBuilder {
    name: String,
    fields: Vec<(String, TypeCode)>,
    affinity_key_field: Option<String>,
}

impl ComplexTypeBuilder {
    /// Creates a builder for a type with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            affinity_key_field: None,
        }
    }

    /// Appends a field.
    pub fn field(mut self, name: impl Into<String>, type_code: TypeCode) -> Self {
        self.fields.push((name.into(), type_code));
        self
    }

    /// Marks a declared field as the affinity key.
    pub fn affinity_key_field(mut self, name: impl Into<String>) -> Self {
        self.affinity_key_field = Some(name.into());
        self
    }

    /// Validates the declaration and computes identifiers.
    pub fn build(self) -> Result<ComplexType> {
        if self.name.is_empty() {
            return Err(IgniteError::Serialization(
                "type name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, type_code) in self.fields {
            if name.is_empty() {
                return Err(IgniteError::Serialization(format!(
                    "type {} has a field with an empty name",
                    self.name
                )));
            }
            if matches!(type_code, TypeCode::Handle | TypeCode::WrappedBinary) {
                return Err(IgniteError::Serialization(format!(
                    "field {}.{} cannot be declared {:?}",
                    self.name, name, type_code
                )));
            }
            let id = entity_id(&name);
            if !seen.insert(id) {
                return Err(IgniteError::Serialization(format!(
                    "field {}.{} collides with another field id {}",
                    self.name, name, id
                )));
            }
            fields.push(FieldDescriptor {
                name,
                id,
                type_code,
            });
        }

        if let Some(key) = &self.affinity_key_field {
            let id = entity_id(key);
            if !fields.iter().any(|f| f.id == id) {
                return Err(IgniteError::Serialization(format!(
                    "affinity key field {} is not declared on {}",
                    key, self.name
                )));
            }
        }

        let ids: Vec<i32> = fields.iter().map(|f| f.id).collect();
        Ok(ComplexType {
            type_id: entity_id(&self.name),
            schema_id: schema_id(&ids),
            name: self.name,
            fields,
            affinity_key_field: self.affinity_key_field,
        })
    }
}

/// Sets fields of one object by name before encoding it.
#[derive(Debug)]
pub struct ObjectBuilder<'a> {
    ty: &'a ComplexType,
    values: Vec<WireValue>,
    order: ByteOrder,
}

impl ObjectBuilder<'_> {
    /// Sets a named field.
    pub fn set(&mut self, name: &str, value: impl Serializable) -> Result<&mut Self> {
        let id = entity_id(name);
        let index = self
            .ty
            .fields
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| {
                IgniteError::Serialization(format!(
                    "type {} has no field {}",
                    self.ty.name, name
                ))
            })?;
        self.values[index] = value.to_wire()?;
        Ok(self)
    }

    /// Encodes the object; unset fields are null.
    pub fn build(&self) -> Result<ComplexObject> {
        self.ty.encode(self.values.clone(), self.order)
    }
}

/// An encoded complex object.
///
/// Holds the complete serialized form so it can be written back verbatim and
/// read one field at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexObject {
    type_id: i32,
    schema_id: i32,
    hash_code: i32,
    flags: i16,
    order: ByteOrder,
    data: Bytes,
}

fn encode_fields(fields: &[(i32, WireValue)], order: ByteOrder) -> Result<(ObjectDataOutput, Vec<usize>)> {
    let mut out = ObjectDataOutput::with_order(order);
    out.write_bytes(&[0u8; HEADER_LEN])?;
    let mut offsets = Vec::with_capacity(fields.len());
    for (_, value) in fields {
        offsets.push(out.len());
        value.write_to(&mut out)?;
    }
    Ok((out, offsets))
}

impl ComplexObject {
    /// Encodes an object from `(field_id, value)` pairs in layout order.
    pub fn from_fields(type_id: i32, fields: &[(i32, WireValue)], order: ByteOrder) -> Result<Self> {
        let (mut out, offsets) = encode_fields(fields, order)?;
        let data_end = out.len();

        // the server hashes the little-endian field bytes
        let hash_code = if order.is_little_endian() {
            bytes_hash(&out.as_bytes()[HEADER_LEN..data_end])
        } else {
            let (le, _) = encode_fields(fields, ByteOrder::LittleEndian)?;
            bytes_hash(&le.as_bytes()[HEADER_LEN..])
        };

        let ids: Vec<i32> = fields.iter().map(|(id, _)| *id).collect();
        let schema = schema_id(&ids);
        let mut flags = FLAG_USER_TYPE;
        let schema_offset = if fields.is_empty() {
            0
        } else {
            flags |= FLAG_HAS_SCHEMA;
            let max_offset = offsets.last().copied().unwrap_or(0);
            let width = if max_offset <= 0xFF {
                flags |= FLAG_OFFSET_ONE_BYTE;
                1
            } else if max_offset <= 0xFFFF {
                flags |= FLAG_OFFSET_TWO_BYTES;
                2
            } else {
                4
            };
            for ((id, _), offset) in fields.iter().zip(&offsets) {
                out.write_int(*id)?;
                match width {
                    1 => out.write_u8(*offset as u8)?,
                    2 => out.write_char(*offset as u16)?,
                    _ => out.write_int(to_i32(*offset)?)?,
                }
            }
            data_end
        };

        let length = to_i32(out.len())?;
        out.patch_u8(0, TypeCode::Complex.as_u8())?;
        out.patch_u8(1, PROTOCOL_VERSION)?;
        out.patch_short(HEADER_FLAGS_POS, flags)?;
        out.patch_int(HEADER_TYPE_ID_POS, type_id)?;
        out.patch_int(HEADER_HASH_POS, hash_code)?;
        out.patch_int(HEADER_LENGTH_POS, length)?;
        out.patch_int(HEADER_SCHEMA_ID_POS, schema)?;
        out.patch_int(HEADER_SCHEMA_OFFSET_POS, to_i32(schema_offset)?)?;

        Ok(Self {
            type_id,
            schema_id: schema,
            hash_code,
            flags,
            order,
            data: out.freeze(),
        })
    }

    /// Reads an object starting at its type code.
    pub fn read_from(input: &mut ObjectDataInput<'_>) -> Result<Self> {
        let start = input.position();
        let code = input.read_u8()?;
        if code != TypeCode::Complex.as_u8() {
            return Err(IgniteError::Serialization(format!(
                "expected complex object, found type code {}",
                code
            )));
        }
        let version = input.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(IgniteError::Serialization(format!(
                "unsupported object layout version {}",
                version
            )));
        }
        let flags = input.read_short()?;
        let type_id = input.read_int()?;
        let hash_code = input.read_int()?;
        let length = input.read_len()?;
        let schema_id = input.read_int()?;
        let schema_offset = input.read_len()?;

        let end = start + length;
        if length < HEADER_LEN || end > input.data().len() {
            return Err(IgniteError::Serialization(format!(
                "object length {} invalid for {} available bytes",
                length,
                input.data().len() - start
            )));
        }
        if flags & FLAG_HAS_SCHEMA != 0 && !(HEADER_LEN..=length).contains(&schema_offset) {
            return Err(IgniteError::Serialization(format!(
                "schema offset {} outside object of {} bytes",
                schema_offset, length
            )));
        }

        let data = Bytes::copy_from_slice(&input.data()[start..end]);
        input.set_position(end)?;
        Ok(Self {
            type_id,
            schema_id,
            hash_code,
            flags,
            order: input.order(),
            data,
        })
    }

    /// Writes the object, re-encoding it if the byte order differs.
    pub fn write_to(&self, out: &mut ObjectDataOutput) -> Result<()> {
        if out.order() == self.order {
            out.write_bytes(&self.data)
        } else {
            let converted = self.with_order(out.order())?;
            out.write_bytes(&converted.data)
        }
    }

    /// Returns the type id.
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Returns the schema id.
    pub fn schema_id(&self) -> i32 {
        self.schema_id
    }

    /// Returns the hash code stamped into the header.
    pub fn hash_code(&self) -> i32 {
        self.hash_code
    }

    /// Returns the header flags.
    pub fn flags(&self) -> i16 {
        self.flags
    }

    /// Returns the byte order of the serialized form.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Returns the serialized form, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the serialized length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the object has no fields.
    pub fn is_empty(&self) -> bool {
        self.flags & FLAG_HAS_SCHEMA == 0
    }

    fn input(&self) -> ObjectDataInput<'_> {
        ObjectDataInput::with_order(&self.data, self.order)
    }

    fn footer_end(&self) -> usize {
        if self.flags & FLAG_HAS_RAW_DATA != 0 {
            self.data.len().saturating_sub(4)
        } else {
            self.data.len()
        }
    }

    fn offset_width(&self) -> usize {
        if self.flags & FLAG_OFFSET_ONE_BYTE != 0 {
            1
        } else if self.flags & FLAG_OFFSET_TWO_BYTES != 0 {
            2
        } else {
            4
        }
    }

    fn schema_offset(&self) -> Result<usize> {
        let mut input = self.input();
        input.set_position(HEADER_SCHEMA_OFFSET_POS)?;
        input.read_len()
    }

    /// Parses the footer into `(field_id, offset)` pairs.
    ///
    /// Compact footers omit ids; `ids` supplies them in layout order.
    fn footer(&self, ids: Option<&[i32]>) -> Result<Vec<(i32, usize)>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let compact = self.flags & FLAG_COMPACT_FOOTER != 0;
        if compact && ids.is_none() {
            return Err(IgniteError::Usage(format!(
                "object of type {} has a compact footer; decode it with its ComplexType",
                self.type_id
            )));
        }

        let width = self.offset_width();
        let entry = if compact { width } else { 4 + width };
        let start = self.schema_offset()?;
        let end = self.footer_end();
        if end < start || (end - start) % entry != 0 {
            return Err(IgniteError::Serialization(format!(
                "malformed footer in object of type {}",
                self.type_id
            )));
        }

        let count = (end - start) / entry;
        let mut input = self.input();
        input.set_position(start)?;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let id = if compact {
                ids.and_then(|ids| ids.get(i).copied()).ok_or_else(|| {
                    IgniteError::Serialization(format!(
                        "object of type {} has more fields than its declared type",
                        self.type_id
                    ))
                })?
            } else {
                input.read_int()?
            };
            let offset = match width {
                1 => usize::from(input.read_u8()?),
                2 => usize::from(input.read_char()?),
                _ => input.read_len()?,
            };
            entries.push((id, offset));
        }
        Ok(entries)
    }

    fn read_at(&self, offset: usize) -> Result<WireValue> {
        let mut input = self.input();
        input.set_position(offset)?;
        WireValue::read_from(&mut input)
    }

    /// Decodes a single field without decoding the others.
    pub fn field(&self, field_id: i32) -> Result<Option<WireValue>> {
        match self.footer(None)?.into_iter().find(|(id, _)| *id == field_id) {
            Some((_, offset)) => self.read_at(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes a single field by name.
    pub fn field_by_name(&self, name: &str) -> Result<Option<WireValue>> {
        self.field(entity_id(name))
    }

    /// Decodes every field in layout order.
    pub fn fields(&self) -> Result<Vec<(i32, WireValue)>> {
        self.footer(None)?
            .into_iter()
            .map(|(id, offset)| Ok((id, self.read_at(offset)?)))
            .collect()
    }

    /// Decodes every field, resolving compact footers through `ty`.
    pub fn fields_with_type(&self, ty: &ComplexType) -> Result<Vec<(i32, WireValue)>> {
        if ty.type_id != self.type_id {
            return Err(IgniteError::Usage(format!(
                "object of type {} decoded with type {}",
                self.type_id, ty.type_id
            )));
        }
        let ids: Vec<i32> = ty.fields.iter().map(|f| f.id).collect();
        self.footer(Some(&ids))?
            .into_iter()
            .map(|(id, offset)| Ok((id, self.read_at(offset)?)))
            .collect()
    }

    /// Returns a copy serialized in `order`.
    pub fn with_order(&self, order: ByteOrder) -> Result<Self> {
        if order == self.order {
            return Ok(self.clone());
        }
        let fields = self.fields()?;
        Self::from_fields(self.type_id, &fields, order)
    }
}

fn to_i32(value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| IgniteError::Serialization(format!("object size {} exceeds i32::MAX", value)))
}
