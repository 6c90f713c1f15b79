//! Outbound request frames.

use bytes::Bytes;

use super::constants::{op_name, REQUEST_HEADER_SIZE};
use crate::error::Result;
use crate::serialization::{ByteOrder, DataOutput, ObjectDataOutput, Serializable, WireValue};

/// A request body awaiting a request id.
///
/// The payload is built once and can be framed again under a new id, which
/// is how the router resends after a connection failure.
#[derive(Debug, Clone)]
pub struct Request {
    op_code: i16,
    payload: ObjectDataOutput,
}

impl Request {
    /// Creates an empty request for `op_code`.
    pub fn new(op_code: i16, order: ByteOrder) -> Self {
        Self {
            op_code,
            payload: ObjectDataOutput::with_order(order),
        }
    }

    /// Creates a request whose payload starts with the cache header.
    pub fn for_cache(op_code: i16, cache_id: i32, order: ByteOrder) -> Result<Self> {
        let mut request = Self::new(op_code, order);
        request.payload.write_int(cache_id)?;
        request.payload.write_u8(0)?;
        Ok(request)
    }

    /// Returns the operation code.
    pub fn op_code(&self) -> i16 {
        self.op_code
    }

    /// Returns a readable operation name.
    pub fn op_name(&self) -> &'static str {
        op_name(self.op_code)
    }

    /// Returns the byte order of the payload.
    pub fn order(&self) -> ByteOrder {
        self.payload.order()
    }

    /// Returns the payload writer.
    pub fn writer(&mut self) -> &mut ObjectDataOutput {
        &mut self.payload
    }

    /// Appends a typed value to the payload.
    pub fn write_value(&mut self, value: &WireValue) -> Result<()> {
        value.write_to(&mut self.payload)
    }

    /// Converts and appends a typed value to the payload.
    pub fn write<T: Serializable + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.to_wire()?.write_to(&mut self.payload)
    }

    /// Returns the payload written so far.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    /// Produces the frame body (without length prefix) under `request_id`.
    pub fn encode(&self, request_id: i64) -> Result<Bytes> {
        let mut out =
            ObjectDataOutput::with_capacity(REQUEST_HEADER_SIZE + self.payload.len(), self.order());
        out.write_short(self.op_code)?;
        out.write_long(request_id)?;
        out.write_bytes(self.payload.as_bytes())?;
        Ok(out.freeze())
    }
}
