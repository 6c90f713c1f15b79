//! Async thin client for [Apache Ignite](https://ignite.apache.org/).
//!
//! The client talks to cluster nodes over the Ignite thin client binary
//! protocol without joining the cluster. It keeps one connection per known
//! node and, when partition awareness is on, sends each key-based request
//! straight to the node that owns the key.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ignite_client::{ClientConfig, IgniteClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .add_address("127.0.0.1:10800".parse()?)
//!         .add_address("127.0.0.1:10801".parse()?)
//!         .build()?;
//!     let client = IgniteClient::connect(config).await?;
//!
//!     let cache = client.get_or_create_cache::<i64, String>("greetings").await?;
//!     cache.put(&1, &"hello".to_string()).await?;
//!     println!("{:?}", cache.get(&1).await?);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | Builders for addresses, timeouts, TLS, credentials and reconnect backoff |
//! | [`connection`] | Handshake, request correlation, TLS transport and the connection pool |
//! | [`cluster`] | Partition maps, affinity lookup and cluster activation state |
//! | [`router`] | Connection selection with affinity hints and a single failover retry |
//! | [`query`] | Scan, SQL and SQL-fields queries and their cursors |
//! | [`cache`] | Typed key-value operations |
//! | [`blocking`] | The same API for synchronous callers |
//!
//! # Errors
//!
//! Every operation returns [`IgniteError`]; [`IgniteError::kind`] sorts it
//! into connection, protocol, application and usage classes. Timeouts are
//! local: the server may still run a request the client stopped waiting for.

#![warn(missing_docs)]

pub mod blocking;
pub mod cache;
mod client;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod query;
pub mod router;

pub use cache::{Cache, CacheDescriptor, PeekMode};
pub use client::IgniteClient;
pub use cluster::{AffinityTarget, Cluster, ClusterState, TopologyTracker};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, NetworkConfig, NetworkConfigBuilder,
    RetryConfig, RetryConfigBuilder, SecurityConfig, SecurityConfigBuilder, TlsConfig,
    TlsConfigBuilder,
};
pub use connection::{
    Connection, ConnectionEvent, ConnectionId, ConnectionPool, ConnectionState,
    HostnameDiscovery, NodeDiscovery, StaticAddressDiscovery,
};
pub use ignite_core as core;
pub use ignite_core::{
    ComplexObject, ComplexType, Deserializable, ErrorKind, IgniteError, Result, Serializable,
    TypeCode, WireValue,
};
pub use query::{Cursor, EntryCursor, FieldsCursor, ScanQuery, SqlFieldsQuery, SqlQuery};
pub use router::{AffinityHint, Router};
