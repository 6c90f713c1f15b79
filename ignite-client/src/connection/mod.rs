//! Node connections: transport, handshake, correlation and pooling.

#[allow(clippy::module_inception)]
mod connection;
mod discovery;
mod pool;
mod stream;
mod tls;

pub use connection::{
    Connection, ConnectionId, ConnectionOptions, ConnectionState, MAX_ABANDONED_REQUESTS,
};
pub use discovery::{HostnameDiscovery, NodeDiscovery, StaticAddressDiscovery};
pub use pool::{ConnectionEvent, ConnectionPool};
pub use stream::Transport;
