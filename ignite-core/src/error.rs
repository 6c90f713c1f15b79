//! Error types for thin client operations.

use std::io;
use thiserror::Error;

/// The main error type for thin client operations.
#[derive(Debug, Error)]
pub enum IgniteError {
    /// Connection-related errors (unreachable node, broken transport).
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol-related errors (malformed frames, unknown request ids, unsupported versions).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encoding/decoding errors for wire values.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A local wait exceeded its deadline. The request may still be processed by the server.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Handshake authentication failures.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Secure transport negotiation failures.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A well-formed server response carrying a typed failure.
    #[error("server error (status {status}): {message}")]
    Server {
        /// Server status code.
        status: i32,
        /// Server-provided description.
        message: String,
    },

    /// Client-side misuse, raised without any network I/O.
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of an [`IgniteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport, handshake or authentication failure.
    Connection,
    /// Malformed or uncorrelated wire data; fatal to the connection.
    Protocol,
    /// Typed failure reported by the server.
    Application,
    /// Client-side misuse.
    Usage,
}

impl IgniteError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_)
            | Self::Timeout(_)
            | Self::Authentication(_)
            | Self::Tls(_)
            | Self::Io(_) => ErrorKind::Connection,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Server { .. } => ErrorKind::Application,
            Self::Serialization(_) | Self::Configuration(_) | Self::Usage(_) => ErrorKind::Usage,
        }
    }

    /// Returns true if the error is connection-class.
    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    /// Returns true if the request may be rerouted to another connection.
    ///
    /// Timeouts are excluded: the request was delivered and may still run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }

    /// Returns the server status code for application errors.
    pub fn server_status(&self) -> Option<i32> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A specialized `Result` type for thin client operations.
pub type Result<T> = std::result::Result<T, IgniteError>;
