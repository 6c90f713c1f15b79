//! Handshake exchange and protocol version negotiation.

use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

use super::constants::{HANDSHAKE_OP, THIN_CLIENT_CODE};
use crate::error::{IgniteError, Result};
use crate::serialization::{ByteOrder, DataInput, DataOutput, ObjectDataInput, ObjectDataOutput, WireValue};

/// A protocol version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    /// Major component.
    pub major: i16,
    /// Minor component.
    pub minor: i16,
    /// Patch component.
    pub patch: i16,
}

impl ProtocolVersion {
    /// Version 1.7.0, the first with feature negotiation.
    pub const V1_7_0: Self = Self::new(1, 7, 0);
    /// Version 1.6.0.
    pub const V1_6_0: Self = Self::new(1, 6, 0);
    /// Version 1.5.0.
    pub const V1_5_0: Self = Self::new(1, 5, 0);
    /// Version 1.4.0, the first reporting the node id.
    pub const V1_4_0: Self = Self::new(1, 4, 0);

    /// Versions this client speaks, newest first.
    pub const SUPPORTED: [Self; 4] = [Self::V1_7_0, Self::V1_6_0, Self::V1_5_0, Self::V1_4_0];

    /// Creates a version.
    pub const fn new(major: i16, minor: i16, patch: i16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns true if this client can speak `self`.
    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }

    /// Returns true if the handshake carries feature masks.
    pub fn supports_features(&self) -> bool {
        *self >= Self::V1_7_0
    }

    /// Returns true if the handshake response carries the node id.
    pub fn supports_node_id(&self) -> bool {
        *self >= Self::V1_4_0
    }

    /// Returns true if responses carry affinity version flags.
    pub fn supports_partition_awareness(&self) -> bool {
        *self >= Self::V1_4_0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V1_7_0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Builds the bitmask announcing `features`.
pub fn feature_mask(features: &[usize]) -> Vec<u8> {
    let len = features.iter().max().map_or(0, |max| max / 8 + 1);
    let mut mask = vec![0u8; len];
    for bit in features {
        mask[bit / 8] |= 1 << (bit % 8);
    }
    mask
}

/// Returns true if `mask` has `feature` set.
pub fn has_feature(mask: &[u8], feature: usize) -> bool {
    mask.get(feature / 8)
        .is_some_and(|byte| byte & (1 << (feature % 8)) != 0)
}

/// The opening message of a connection.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    version: ProtocolVersion,
    features: Vec<usize>,
    credentials: Option<(String, String)>,
}

impl HandshakeRequest {
    /// Creates a request for `version` announcing `features`.
    pub fn new(version: ProtocolVersion, features: &[usize]) -> Self {
        Self {
            version,
            features: features.to_vec(),
            credentials: None,
        }
    }

    /// Attaches credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Returns the proposed version.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Produces the frame body (without length prefix).
    pub fn encode(&self, order: ByteOrder) -> Result<Bytes> {
        let mut out = ObjectDataOutput::with_order(order);
        out.write_u8(HANDSHAKE_OP)?;
        out.write_short(self.version.major)?;
        out.write_short(self.version.minor)?;
        out.write_short(self.version.patch)?;
        out.write_u8(THIN_CLIENT_CODE)?;
        if self.version.supports_features() {
            WireValue::ByteArray(feature_mask(&self.features)).write_to(&mut out)?;
        }
        if let Some((username, password)) = &self.credentials {
            WireValue::String(username.clone()).write_to(&mut out)?;
            WireValue::String(password.clone()).write_to(&mut out)?;
        }
        Ok(out.freeze())
    }
}

/// The server's answer to a [`HandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResponse {
    /// The proposed version was accepted.
    Accepted {
        /// Feature bitmask announced by the server.
        features: Vec<u8>,
        /// Identity of the node behind the connection.
        node_id: Option<Uuid>,
    },
    /// The proposal was refused.
    Rejected {
        /// Version the server would accept.
        server_version: ProtocolVersion,
        /// Server-provided reason.
        message: String,
        /// Server status code.
        status: i32,
    },
}

impl HandshakeResponse {
    /// Parses a frame body received in reply to a request for `version`.
    pub fn decode(frame: &[u8], version: ProtocolVersion, order: ByteOrder) -> Result<Self> {
        let mut input = ObjectDataInput::with_order(frame, order);
        let accepted = input.read_bool().map_err(to_protocol)?;

        if accepted {
            let features = if version.supports_features() && input.remaining() > 0 {
                match WireValue::read_from(&mut input).map_err(to_protocol)? {
                    WireValue::ByteArray(mask) => mask,
                    WireValue::Null => Vec::new(),
                    other => {
                        return Err(IgniteError::Protocol(format!(
                            "handshake features have type {:?}",
                            other.type_code()
                        )))
                    }
                }
            } else {
                Vec::new()
            };
            let node_id = if version.supports_node_id() && input.remaining() > 0 {
                match WireValue::read_from(&mut input).map_err(to_protocol)? {
                    WireValue::Uuid(id) => Some(id),
                    WireValue::Null => None,
                    other => {
                        return Err(IgniteError::Protocol(format!(
                            "handshake node id has type {:?}",
                            other.type_code()
                        )))
                    }
                }
            } else {
                None
            };
            return Ok(Self::Accepted { features, node_id });
        }

        let server_version = ProtocolVersion::new(
            input.read_short().map_err(to_protocol)?,
            input.read_short().map_err(to_protocol)?,
            input.read_short().map_err(to_protocol)?,
        );
        let message = match WireValue::read_from(&mut input).map_err(to_protocol)? {
            WireValue::String(s) => s,
            _ => String::new(),
        };
        let status = if input.remaining() >= 4 {
            input.read_int().map_err(to_protocol)?
        } else {
            0
        };
        Ok(Self::Rejected {
            server_version,
            message,
            status,
        })
    }
}

fn to_protocol(err: IgniteError) -> IgniteError {
    IgniteError::Protocol(format!("malformed handshake response: {}", err))
}
