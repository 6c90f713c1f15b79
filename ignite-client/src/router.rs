//! Picks the connection that serves each request.

use std::sync::Arc;

use ignite_core::protocol::{Request, Response};
use ignite_core::{IgniteError, Result, WireValue};
use tracing::instrument;

use crate::cache::CacheDescriptor;
use crate::cluster::TopologyTracker;
use crate::connection::{Connection, ConnectionPool};
use crate::query::CursorTable;

/// Data location a request should be sent close to.
#[derive(Debug, Clone, Copy)]
pub enum AffinityHint<'a> {
    /// The node owning `key` in `cache`.
    Key {
        /// Cache the key belongs to.
        cache: &'a CacheDescriptor,
        /// The key, before affinity field extraction.
        key: &'a WireValue,
    },
    /// The node owning a whole partition.
    Partition {
        /// Cache the partition belongs to.
        cache: &'a CacheDescriptor,
        /// Partition index.
        partition: usize,
    },
}

impl AffinityHint<'_> {
    fn cache(&self) -> &CacheDescriptor {
        match self {
            Self::Key { cache, .. } | Self::Partition { cache, .. } => cache,
        }
    }
}

/// Dispatches requests over the pool.
///
/// With a hint, the request goes straight to the primary node of the data
/// when a ready connection to it exists; otherwise connections are used
/// round-robin and the server forwards internally. A request that fails at
/// the connection level is resent once on a different connection.
#[derive(Debug)]
pub struct Router {
    pool: ConnectionPool,
    topology: TopologyTracker,
    partition_awareness: bool,
    cursors: CursorTable,
}

impl Router {
    /// Creates a router over `pool`.
    pub fn new(pool: ConnectionPool, topology: TopologyTracker, partition_awareness: bool) -> Self {
        Self {
            pool,
            topology,
            partition_awareness,
            cursors: CursorTable::default(),
        }
    }

    pub(crate) fn cursors(&self) -> &CursorTable {
        &self.cursors
    }

    /// Returns the connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Returns the topology tracker.
    pub fn topology(&self) -> &TopologyTracker {
        &self.topology
    }

    /// Returns true if hints are honoured.
    pub fn partition_awareness(&self) -> bool {
        self.partition_awareness
    }

    /// Sends `request`, preferring the node named by `hint`.
    ///
    /// Server-reported failures are returned as [`IgniteError::Server`] and
    /// never retried. A request resent after a connection failure may have
    /// been applied by the first node already.
    #[instrument(name = "router.dispatch", skip_all, fields(op = request.op_name()))]
    pub async fn dispatch(&self, request: &Request, hint: Option<AffinityHint<'_>>) -> Result<Response> {
        let preferred = self.preferred(hint).await;
        self.dispatch_from(request, preferred)
            .await
            .map(|(_, response)| response)
    }

    /// Like [`dispatch`](Self::dispatch), also returning the connection
    /// that produced the response.
    ///
    /// Requests that open server-side resources use this so follow-ups can
    /// be pinned to the same node.
    #[instrument(name = "router.dispatch_pinned", skip_all, fields(op = request.op_name()))]
    pub async fn dispatch_pinned(
        &self,
        request: &Request,
        hint: Option<AffinityHint<'_>>,
    ) -> Result<(Arc<Connection>, Response)> {
        let preferred = self.preferred(hint).await;
        self.dispatch_from(request, preferred).await
    }

    async fn preferred(&self, hint: Option<AffinityHint<'_>>) -> Option<Arc<Connection>> {
        let hint = hint.filter(|_| self.partition_awareness)?;
        match self.affinity_connection(hint).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::debug!(error = %e, "affinity lookup failed; falling back to round robin");
                None
            }
        }
    }

    /// Sends `request` on `connection` only, without retrying elsewhere.
    ///
    /// Used for requests bound to server-side state held by one node.
    #[instrument(name = "router.dispatch_on", skip_all, fields(id = %connection.id(), op = request.op_name()))]
    pub async fn dispatch_on(&self, connection: &Arc<Connection>, request: &Request) -> Result<Response> {
        self.ensure_open()?;
        let result = self.send_on(connection, request).await;
        if let Err(e) = &result {
            if e.is_retryable() {
                self.on_failure(connection, e);
            }
        }
        result
    }

    /// Fails with a usage error once the owning client has been closed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(IgniteError::Usage("client is closed".to_string()));
        }
        Ok(())
    }

    /// Returns a ready connection, round-robin.
    pub fn any_connection(&self) -> Result<Arc<Connection>> {
        self.ensure_open()?;
        self.pool
            .next_ready(None)
            .ok_or_else(|| IgniteError::Connection("no ready connection".to_string()))
    }

    async fn dispatch_from(
        &self,
        request: &Request,
        preferred: Option<Arc<Connection>>,
    ) -> Result<(Arc<Connection>, Response)> {
        let first = match preferred {
            Some(connection) => connection,
            None => self.any_connection()?,
        };

        let error = match self.send_on(&first, request).await {
            Ok(response) => return Ok((first, response)),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        self.on_failure(&first, &error);
        if self.pool.is_closed() {
            return Err(error);
        }
        tracing::warn!(id = %first.id(), error = %error, "request failed; retrying on another connection");

        let second = self.pool.next_ready(Some(first.id())).ok_or_else(|| {
            IgniteError::Connection(format!("no alternate connection after failure: {}", error))
        })?;
        match self.send_on(&second, request).await {
            Ok(response) => Ok((second, response)),
            Err(e) => {
                if e.is_retryable() {
                    self.on_failure(&second, &e);
                }
                Err(e)
            }
        }
    }

    async fn send_on(&self, connection: &Arc<Connection>, request: &Request) -> Result<Response> {
        let response = connection.request(request).await?;
        if let Some(version) = response.affinity_version() {
            self.topology.observe(version);
        }
        response.into_result()
    }

    fn on_failure(&self, connection: &Arc<Connection>, error: &IgniteError) {
        self.pool.evict(connection.id(), error);
        if let Some(node) = connection.node_id() {
            self.topology.node_unreachable(node);
        }
    }

    async fn affinity_connection(&self, hint: AffinityHint<'_>) -> Result<Option<Arc<Connection>>> {
        let cache = hint.cache();
        let snapshot = self
            .topology
            .ensure_fresh(cache.cache_id(), |request| async move {
                self.dispatch_from(&request, None)
                    .await
                    .map(|(_, response)| response)
            })
            .await?;

        let node = match hint {
            AffinityHint::Key { cache, key } => self
                .topology
                .affinity(&snapshot, cache, key)?
                .map(|target| target.node),
            AffinityHint::Partition { cache, partition } => snapshot
                .partition_map(cache.cache_id())
                .and_then(|map| map.primary(partition)),
        };
        Ok(node.and_then(|node| {
            let connection = self.pool.for_node(node);
            if connection.is_none() {
                tracing::trace!(node = %node, "primary node has no ready connection");
            }
            connection
        }))
    }
}
