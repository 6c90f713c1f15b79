//! Thin client binary protocol.
//!
//! Frames are `i32` length-prefixed. Requests carry an op code and request
//! id; responses echo the id, followed by flags and optional affinity and
//! error sections.

mod codec;
pub mod constants;
mod handshake;
mod request;
mod response;

pub use codec::FrameCodec;
pub use constants::*;
pub use handshake::{feature_mask, has_feature, HandshakeRequest, HandshakeResponse, ProtocolVersion};
pub use request::Request;
pub use response::{AffinityVersion, Response};
