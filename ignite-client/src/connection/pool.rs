//! The set of live connections owned by one client.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ignite_core::{IgniteError, Result};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::instrument;
use uuid::Uuid;

use super::connection::{Connection, ConnectionId, ConnectionOptions};
use super::discovery::{NodeDiscovery, StaticAddressDiscovery};
use crate::config::{ClientConfig, RetryConfig};

/// Events emitted during connection lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection completed its handshake and joined the pool.
    Connected {
        /// The connection identifier.
        id: ConnectionId,
        /// The node address.
        address: SocketAddr,
        /// The node identity, if reported.
        node_id: Option<Uuid>,
    },
    /// A connection left the pool.
    Disconnected {
        /// The connection identifier.
        id: ConnectionId,
        /// The node address.
        address: SocketAddr,
        /// Why it left, if it failed.
        error: Option<String>,
    },
    /// A reconnect attempt is about to run.
    ReconnectAttempt {
        /// The address being reconnected.
        address: SocketAddr,
        /// The current attempt number.
        attempt: u32,
        /// The delay before this attempt.
        next_delay: Duration,
    },
    /// All reconnect attempts for an address were used up.
    ReconnectFailed {
        /// The address that could not be reached.
        address: SocketAddr,
        /// The error from the last attempt.
        error: String,
    },
}

#[derive(Debug)]
struct PoolInner {
    options: ConnectionOptions,
    retry: RetryConfig,
    discovery: Arc<dyn NodeDiscovery>,
    connections: RwLock<Arc<Vec<Arc<Connection>>>>,
    cursor: AtomicUsize,
    reconnecting: Mutex<HashSet<SocketAddr>>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

/// Live connections to cluster nodes.
///
/// The membership list is copy-on-write: readers take an `Arc` snapshot and
/// never observe a partially updated set. Connections that fail are evicted
/// and, unless the pool is shutting down, reconnected in the background with
/// exponential backoff.
#[derive(Debug)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    failures: Mutex<Option<mpsc::UnboundedReceiver<ConnectionId>>>,
}

impl ConnectionPool {
    /// Creates an empty pool; call [`start`](Self::start) to connect.
    pub fn new(config: &ClientConfig, discovery: impl NodeDiscovery + 'static) -> Self {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(PoolInner {
                options: ConnectionOptions::from_config(config).with_failure_notifier(failure_tx),
                retry: config.retry().clone(),
                discovery: Arc::new(discovery),
                connections: RwLock::new(Arc::new(Vec::new())),
                cursor: AtomicUsize::new(0),
                reconnecting: Mutex::new(HashSet::new()),
                events,
                shutdown,
                closed: AtomicBool::new(false),
            }),
            failures: Mutex::new(Some(failure_rx)),
        }
    }

    /// Creates a pool over the configured seed addresses.
    pub fn from_config(config: &ClientConfig) -> Self {
        let discovery = StaticAddressDiscovery::new(config.network().addresses().to_vec());
        Self::new(config, discovery)
    }

    /// Connects to every discovered node.
    ///
    /// Succeeds if at least one handshake completes; otherwise returns the
    /// last failure, so a credential rejection surfaces as such.
    #[instrument(name = "connection_pool.start", skip(self))]
    pub async fn start(&self) -> Result<()> {
        if let Some(failures) = self.failures.lock().take() {
            tokio::spawn(supervise(Arc::clone(&self.inner), failures));
        }

        let addresses = self.inner.discovery.discover().await?;
        if addresses.is_empty() {
            return Err(IgniteError::Connection("no node addresses to connect to".to_string()));
        }
        tracing::debug!(count = addresses.len(), "connecting to nodes");

        let attempts = join_all(addresses.iter().map(|&address| self.inner.connect(address))).await;
        let mut last_error = None;
        for (address, attempt) in addresses.iter().zip(attempts) {
            if let Err(e) = attempt {
                tracing::warn!(address = %address, error = %e, "failed initial connection");
                last_error = Some(e);
            }
        }

        if self.inner.snapshot().is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                IgniteError::Connection("failed to establish any connection".to_string())
            }));
        }
        Ok(())
    }

    /// Returns the options new connections are opened with.
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Returns a consistent snapshot of the pool membership.
    pub fn connections(&self) -> Arc<Vec<Arc<Connection>>> {
        self.inner.snapshot()
    }

    /// Returns the number of pooled connections.
    pub fn len(&self) -> usize {
        self.inner.snapshot().len()
    }

    /// Returns true if the pool holds no connection.
    pub fn is_empty(&self) -> bool {
        self.inner.snapshot().is_empty()
    }

    /// Picks the next ready connection in round-robin order, skipping `exclude`.
    pub fn next_ready(&self, exclude: Option<ConnectionId>) -> Option<Arc<Connection>> {
        let snapshot = self.inner.snapshot();
        if snapshot.is_empty() {
            return None;
        }
        let start = self.inner.cursor.fetch_add(1, Ordering::Relaxed);
        (0..snapshot.len())
            .map(|offset| &snapshot[(start + offset) % snapshot.len()])
            .find(|conn| conn.is_ready() && Some(conn.id()) != exclude)
            .cloned()
    }

    /// Returns a ready connection to `node`, if one is pooled.
    pub fn for_node(&self, node: Uuid) -> Option<Arc<Connection>> {
        self.inner
            .snapshot()
            .iter()
            .find(|conn| conn.is_ready() && conn.node_id() == Some(node))
            .cloned()
    }

    /// Removes a connection and schedules a reconnect to its address.
    ///
    /// Evicting an id that is no longer pooled does nothing.
    pub fn evict(&self, id: ConnectionId, reason: &IgniteError) -> Option<Arc<Connection>> {
        self.inner.evict(id, Some(reason.to_string()))
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes every connection and stops background reconnects.
    #[instrument(name = "connection_pool.shutdown", skip(self))]
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        let drained = std::mem::take(&mut *self.inner.connections.write());
        tracing::debug!(connection_count = drained.len(), "closing all connections");
        for connection in drained.iter() {
            connection.close().await;
            let _ = self.inner.events.send(ConnectionEvent::Disconnected {
                id: connection.id(),
                address: connection.address(),
                error: None,
            });
        }
        tracing::info!("connection pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown.send_replace(true);
    }
}

impl PoolInner {
    fn snapshot(&self) -> Arc<Vec<Arc<Connection>>> {
        Arc::clone(&self.connections.read())
    }

    #[instrument(name = "connection_pool.connect", skip(self), fields(address = %address))]
    async fn connect(&self, address: SocketAddr) -> Result<ConnectionId> {
        let connection = Connection::connect(address, &self.options).await?;
        let id = connection.id();
        let node_id = connection.node_id();

        // shutdown flips `closed` before draining under the same lock
        let admitted = {
            let mut guard = self.connections.write();
            if self.closed.load(Ordering::Acquire) {
                false
            } else {
                let mut next = Vec::with_capacity(guard.len() + 1);
                next.extend(guard.iter().cloned());
                next.push(Arc::clone(&connection));
                *guard = Arc::new(next);
                true
            }
        };
        if !admitted {
            connection.close().await;
            return Err(IgniteError::Usage("client is closed".to_string()));
        }

        let _ = self.events.send(ConnectionEvent::Connected {
            id,
            address,
            node_id,
        });
        tracing::info!(id = %id, node = ?node_id, "connected to node");
        Ok(id)
    }

    fn evict(self: &Arc<Self>, id: ConnectionId, error: Option<String>) -> Option<Arc<Connection>> {
        let evicted = {
            let mut guard = self.connections.write();
            let position = guard.iter().position(|conn| conn.id() == id)?;
            let mut next: Vec<_> = guard.iter().cloned().collect();
            let evicted = next.remove(position);
            *guard = Arc::new(next);
            evicted
        };

        let address = evicted.address();
        tracing::info!(id = %id, address = %address, "evicted connection");
        let _ = self.events.send(ConnectionEvent::Disconnected {
            id,
            address,
            error: error.clone(),
        });
        evicted.fail(IgniteError::Connection(
            error.unwrap_or_else(|| "evicted".to_string()),
        ));

        if !self.closed.load(Ordering::Acquire) && self.reconnecting.lock().insert(address) {
            tokio::spawn(reconnect(Arc::clone(self), address));
        }
        Some(evicted)
    }
}

async fn supervise(pool: Arc<PoolInner>, mut failures: mpsc::UnboundedReceiver<ConnectionId>) {
    let mut shutdown = pool.shutdown.subscribe();
    loop {
        tokio::select! {
            failed = failures.recv() => match failed {
                Some(id) => {
                    pool.evict(id, Some("connection failed".to_string()));
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("connection supervisor stopped");
}

#[instrument(name = "connection_pool.reconnect", skip(pool), fields(address = %address))]
async fn reconnect(pool: Arc<PoolInner>, address: SocketAddr) {
    let mut shutdown = pool.shutdown.subscribe();
    let mut backoff = pool.retry.initial_backoff();
    let mut attempt = 0u32;
    let mut last_error = String::new();

    while attempt < pool.retry.max_retries() {
        attempt += 1;
        let _ = pool.events.send(ConnectionEvent::ReconnectAttempt {
            address,
            attempt,
            next_delay: backoff,
        });
        tracing::debug!(attempt, backoff = ?backoff, "attempting reconnection");

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => {
                pool.reconnecting.lock().remove(&address);
                return;
            }
        }
        if pool.closed.load(Ordering::Acquire) {
            break;
        }

        match pool.connect(address).await {
            Ok(id) => {
                tracing::info!(id = %id, attempt, "reconnection successful");
                pool.reconnecting.lock().remove(&address);
                return;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "reconnection attempt failed");
                last_error = e.to_string();
            }
        }

        backoff = pool.retry.next_backoff(backoff);
    }

    pool.reconnecting.lock().remove(&address);
    if !pool.closed.load(Ordering::Acquire) {
        tracing::error!(attempts = attempt, "reconnection failed permanently");
        let _ = pool.events.send(ConnectionEvent::ReconnectFailed {
            address,
            error: last_error,
        });
    }
}
