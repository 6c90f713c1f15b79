//! Inbound response frames.

use bytes::Bytes;

use super::constants::{RESPONSE_FLAG_AFFINITY_CHANGED, RESPONSE_FLAG_ERROR, RESPONSE_HEADER_SIZE};
use crate::error::{IgniteError, Result};
use crate::serialization::{ByteOrder, DataInput, ObjectDataInput, WireValue};

/// Version of the cluster's partition assignment.
///
/// Ordered lexicographically by `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AffinityVersion {
    /// Incremented on membership changes.
    pub major: i64,
    /// Incremented on assignment changes within a membership.
    pub minor: i32,
}

impl AffinityVersion {
    /// Creates a version.
    pub fn new(major: i64, minor: i32) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for AffinityVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A parsed response frame.
#[derive(Debug, Clone)]
pub struct Response {
    request_id: i64,
    flags: i16,
    affinity_version: Option<AffinityVersion>,
    error: Option<(i32, String)>,
    payload: Bytes,
    order: ByteOrder,
}

impl Response {
    /// Parses a frame body (length prefix already removed).
    pub fn parse(frame: Bytes, order: ByteOrder) -> Result<Self> {
        if frame.len() < RESPONSE_HEADER_SIZE {
            return Err(IgniteError::Protocol(format!(
                "response of {} bytes is shorter than its header",
                frame.len()
            )));
        }
        let mut input = ObjectDataInput::with_order(&frame, order);
        let request_id = input.read_long().map_err(to_protocol)?;
        let flags = input.read_short().map_err(to_protocol)?;

        let affinity_version = if flags & RESPONSE_FLAG_AFFINITY_CHANGED != 0 {
            let major = input.read_long().map_err(to_protocol)?;
            let minor = input.read_int().map_err(to_protocol)?;
            Some(AffinityVersion::new(major, minor))
        } else {
            None
        };

        let error = if flags & RESPONSE_FLAG_ERROR != 0 {
            let status = input.read_int().map_err(to_protocol)?;
            let message = match WireValue::read_from(&mut input).map_err(to_protocol)? {
                WireValue::String(s) => s,
                WireValue::Null => String::new(),
                other => {
                    return Err(IgniteError::Protocol(format!(
                        "error message has type {:?}",
                        other.type_code()
                    )))
                }
            };
            Some((status, message))
        } else {
            None
        };

        let payload = frame.slice(input.position()..);
        Ok(Self {
            request_id,
            flags,
            affinity_version,
            error,
            payload,
            order,
        })
    }

    /// Returns the correlated request id.
    pub fn request_id(&self) -> i64 {
        self.request_id
    }

    /// Returns the raw response flags.
    pub fn flags(&self) -> i16 {
        self.flags
    }

    /// Returns the affinity version if the server reported a change.
    pub fn affinity_version(&self) -> Option<AffinityVersion> {
        self.affinity_version
    }

    /// Returns true if the server reported a failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Converts a server-reported failure into [`IgniteError::Server`].
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some((status, message)) => Err(IgniteError::Server { status, message }),
            None => Ok(self),
        }
    }

    /// Returns the payload after the header.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns a reader over the payload.
    pub fn reader(&self) -> ObjectDataInput<'_> {
        ObjectDataInput::with_order(&self.payload, self.order)
    }
}

fn to_protocol(err: IgniteError) -> IgniteError {
    IgniteError::Protocol(format!("malformed response header: {}", err))
}
