//! Seed node discovery.

use std::net::SocketAddr;

use async_trait::async_trait;
use ignite_core::protocol::DEFAULT_PORT;
use ignite_core::{IgniteError, Result};

/// Source of node addresses the pool connects to.
#[async_trait]
pub trait NodeDiscovery: Send + Sync + std::fmt::Debug {
    /// Returns the addresses to open connections to.
    async fn discover(&self) -> Result<Vec<SocketAddr>>;
}

/// Seeds known up front. Duplicates are dropped, first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAddressDiscovery(Vec<SocketAddr>);

impl StaticAddressDiscovery {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        addresses.into_iter().collect()
    }

    /// A single node on localhost at the default port.
    pub fn localhost() -> Self {
        Self(vec![SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))])
    }

    pub fn addresses(&self) -> &[SocketAddr] {
        &self.0
    }
}

impl FromIterator<SocketAddr> for StaticAddressDiscovery {
    fn from_iter<I: IntoIterator<Item = SocketAddr>>(iter: I) -> Self {
        let mut seeds: Vec<SocketAddr> = Vec::new();
        for addr in iter {
            if !seeds.contains(&addr) {
                seeds.push(addr);
            }
        }
        Self(seeds)
    }
}

#[async_trait]
impl NodeDiscovery for StaticAddressDiscovery {
    async fn discover(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.0.clone())
    }
}

/// Resolves `host[:port]` names on every discovery round.
///
/// A missing port means the default thin client port.
#[derive(Debug, Clone)]
pub struct HostnameDiscovery {
    hosts: Vec<String>,
}

impl HostnameDiscovery {
    /// Creates a discovery over `hosts`.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    fn with_port(host: &str) -> String {
        if host.parse::<std::net::Ipv6Addr>().is_ok() {
            return format!("[{}]:{}", host, DEFAULT_PORT);
        }
        let has_port = if host.starts_with('[') {
            host.contains("]:")
        } else {
            host.contains(':')
        };
        if has_port {
            host.to_string()
        } else {
            format!("{}:{}", host, DEFAULT_PORT)
        }
    }
}

#[async_trait]
impl NodeDiscovery for HostnameDiscovery {
    async fn discover(&self) -> Result<Vec<SocketAddr>> {
        let mut resolved_all = Vec::new();
        for host in &self.hosts {
            match tokio::net::lookup_host(Self::with_port(host)).await {
                Ok(resolved) => resolved_all.extend(resolved),
                Err(e) => tracing::warn!(host = %host, error = %e, "cannot resolve node address"),
            }
        }
        let addresses = StaticAddressDiscovery::from_iter(resolved_all).0;
        if addresses.is_empty() && !self.hosts.is_empty() {
            return Err(IgniteError::Connection(format!(
                "none of {:?} could be resolved",
                self.hosts
            )));
        }
        Ok(addresses)
    }
}
