//! A single session to one cluster node.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ignite_core::protocol::{
    has_feature, FrameCodec, HandshakeRequest, HandshakeResponse, ProtocolVersion, Request,
    Response, CLIENT_FEATURES, STATUS_AUTH_FAILED,
};
use ignite_core::{ByteOrder, IgniteError, Result};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::instrument;
use uuid::Uuid;

use super::stream::Transport;
use super::tls::create_tls_connector;
use crate::config::{ClientConfig, TlsConfig};

type FramedTransport = Framed<Transport, FrameCodec>;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Timed-out requests a connection tolerates before it is failed as unresponsive.
pub const MAX_ABANDONED_REQUESTS: usize = 1024;

enum PendingSlot {
    Waiting(oneshot::Sender<Result<Response>>),
    /// The caller gave up; a reply arriving before `expires` is dropped quietly.
    Abandoned { expires: Instant },
}

/// In-flight requests by id, plus tombstones for timed-out ones.
#[derive(Default)]
struct PendingTable {
    slots: HashMap<i64, PendingSlot>,
    abandoned: usize,
}

impl PendingTable {
    fn insert(&mut self, request_id: i64, tx: oneshot::Sender<Result<Response>>) {
        self.sweep(Instant::now());
        self.slots.insert(request_id, PendingSlot::Waiting(tx));
    }

    fn sweep(&mut self, now: Instant) {
        if self.abandoned == 0 {
            return;
        }
        self.slots.retain(|_, slot| {
            !matches!(slot, PendingSlot::Abandoned { expires } if *expires <= now)
        });
        self.abandoned = self
            .slots
            .values()
            .filter(|slot| matches!(slot, PendingSlot::Abandoned { .. }))
            .count();
    }

    fn remove(&mut self, request_id: i64) -> Option<PendingSlot> {
        let slot = self.slots.remove(&request_id);
        if matches!(slot, Some(PendingSlot::Abandoned { .. })) {
            self.abandoned -= 1;
        }
        slot
    }

    /// Turns a waiting request into a tombstone and returns the tombstone count.
    fn abandon(&mut self, request_id: i64, expires: Instant) -> usize {
        if let Some(slot) = self.slots.get_mut(&request_id) {
            if matches!(slot, PendingSlot::Waiting(_)) {
                *slot = PendingSlot::Abandoned { expires };
                self.abandoned += 1;
            }
        }
        self.abandoned
    }

    fn drain(&mut self) -> Vec<oneshot::Sender<Result<Response>>> {
        self.abandoned = 0;
        self.slots
            .drain()
            .filter_map(|(_, slot)| match slot {
                PendingSlot::Waiting(tx) => Some(tx),
                PendingSlot::Abandoned { .. } => None,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-wide identifier.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection.
///
/// `Disconnected → Connecting → HandshakeInFlight → Ready → {Closing, Failed} → Closed`.
/// A [`Connection`] handle is handed out once it reaches `Ready`; the earlier
/// states are only traversed inside [`Connection::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No transport.
    Disconnected = 0,
    /// Transport being established.
    Connecting = 1,
    /// Handshake sent, awaiting the answer.
    HandshakeInFlight = 2,
    /// Accepting requests.
    Ready = 3,
    /// Orderly shutdown in progress.
    Closing = 4,
    /// Broken by an I/O or protocol error.
    Failed = 5,
    /// Terminal.
    Closed = 6,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::HandshakeInFlight,
            3 => Self::Ready,
            4 => Self::Closing,
            5 => Self::Failed,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-connection settings derived from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    connect_timeout: Duration,
    request_timeout: Duration,
    order: ByteOrder,
    version: ProtocolVersion,
    max_frame_size: usize,
    tls: TlsConfig,
    credentials: Option<(String, String)>,
    failures: Option<mpsc::UnboundedSender<ConnectionId>>,
}

impl ConnectionOptions {
    /// Extracts the connection-level settings of a client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        let network = config.network();
        Self {
            connect_timeout: network.connection_timeout(),
            request_timeout: network.request_timeout(),
            order: network.byte_order(),
            version: network.protocol_version(),
            max_frame_size: network.max_frame_size(),
            tls: network.tls().clone(),
            credentials: config
                .security()
                .credentials()
                .map(|(user, password)| (user.to_string(), password.to_string())),
            failures: None,
        }
    }

    /// Reports the id of every connection that transitions to `Failed`.
    pub(crate) fn with_failure_notifier(mut self, tx: mpsc::UnboundedSender<ConnectionId>) -> Self {
        self.failures = Some(tx);
        self
    }

    /// Returns the byte order frames are encoded with.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

enum HandshakeOutcome {
    Ready(Arc<Connection>),
    Downgrade(ProtocolVersion),
}

/// A session to a single node.
///
/// Requests are multiplexed: each is tagged with a fresh request id and its
/// response is routed back by a background reader task, so any number of
/// callers may share one connection.
pub struct Connection {
    id: ConnectionId,
    address: SocketAddr,
    state: AtomicU8,
    version: ProtocolVersion,
    features: Vec<u8>,
    node_id: Option<Uuid>,
    order: ByteOrder,
    max_frame_size: usize,
    request_timeout: Duration,
    tls: bool,
    next_request_id: AtomicI64,
    pending: Mutex<PendingTable>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    failures: Option<mpsc::UnboundedSender<ConnectionId>>,
    created_at: Instant,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("version", &self.version)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl Connection {
    /// Opens a session to `address` and completes the handshake.
    ///
    /// When the server rejects the proposed protocol version but names an
    /// older one this client speaks, the handshake is retried on a fresh
    /// socket with that version.
    #[instrument(name = "connection.connect", skip(options), fields(address = %address))]
    pub async fn connect(address: SocketAddr, options: &ConnectionOptions) -> Result<Arc<Self>> {
        let mut version = options.version;
        for _ in 0..ProtocolVersion::SUPPORTED.len() {
            match Self::open(address, options, version).await? {
                HandshakeOutcome::Ready(connection) => return Ok(connection),
                HandshakeOutcome::Downgrade(offered) => {
                    tracing::info!(proposed = %version, offered = %offered, "renegotiating protocol version");
                    version = offered;
                }
            }
        }
        Err(IgniteError::Protocol(format!(
            "no protocol version agreed with {}",
            address
        )))
    }

    async fn open(
        address: SocketAddr,
        options: &ConnectionOptions,
        version: ProtocolVersion,
    ) -> Result<HandshakeOutcome> {
        let id = ConnectionId::next();
        tracing::trace!(id = %id, state = %ConnectionState::Connecting, "connection state");

        let socket = timeout(options.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                IgniteError::Connection(format!(
                    "connect to {} timed out after {:?}",
                    address, options.connect_timeout
                ))
            })?
            .map_err(|e| IgniteError::Connection(format!("connect to {} failed: {}", address, e)))?;
        socket.set_nodelay(true)?;

        let transport = if options.tls.enabled() {
            let (connector, server_name) =
                create_tls_connector(&options.tls, &address.ip().to_string())?;
            let session = timeout(options.connect_timeout, connector.connect(server_name, socket))
                .await
                .map_err(|_| IgniteError::Tls(format!("TLS handshake with {} timed out", address)))?
                .map_err(|e| IgniteError::Tls(format!("TLS handshake with {} failed: {}", address, e)))?;
            Transport::tls(session)
        } else {
            Transport::tcp(socket)
        };
        let tls = transport.is_tls();

        let mut framed = Framed::new(
            transport,
            FrameCodec::with_max_frame_size(options.order, options.max_frame_size),
        );

        let mut handshake = HandshakeRequest::new(version, CLIENT_FEATURES);
        if let Some((user, password)) = &options.credentials {
            handshake = handshake.with_credentials(user.as_str(), password.as_str());
        }
        framed.send(handshake.encode(options.order)?).await.map_err(|e| {
            IgniteError::Connection(format!("handshake write to {} failed: {}", address, e))
        })?;
        tracing::trace!(id = %id, state = %ConnectionState::HandshakeInFlight, version = %version, "connection state");

        let frame = match timeout(options.connect_timeout, framed.next()).await {
            Err(_) => {
                return Err(IgniteError::Connection(format!(
                    "handshake with {} timed out",
                    address
                )))
            }
            Ok(None) => {
                return Err(IgniteError::Connection(format!(
                    "{} closed the connection during handshake",
                    address
                )))
            }
            Ok(Some(frame)) => frame?,
        };

        match HandshakeResponse::decode(&frame, version, options.order)? {
            HandshakeResponse::Accepted { features, node_id } => {
                let connection = Self::start(id, address, options, version, features, node_id, tls, framed);
                tracing::info!(id = %id, version = %version, node = ?connection.node_id, "connection ready");
                Ok(HandshakeOutcome::Ready(connection))
            }
            HandshakeResponse::Rejected { status, message, .. } if status == STATUS_AUTH_FAILED => {
                tracing::warn!(id = %id, "handshake rejected credentials");
                Err(IgniteError::Authentication(message))
            }
            HandshakeResponse::Rejected {
                server_version,
                message,
                ..
            } => {
                if server_version != version && server_version.is_supported() {
                    return Ok(HandshakeOutcome::Downgrade(server_version));
                }
                Err(IgniteError::Protocol(format!(
                    "{} rejected protocol {} (server speaks {}): {}",
                    address, version, server_version, message
                )))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn start(
        id: ConnectionId,
        address: SocketAddr,
        options: &ConnectionOptions,
        version: ProtocolVersion,
        features: Vec<u8>,
        node_id: Option<Uuid>,
        tls: bool,
        framed: FramedTransport,
    ) -> Arc<Self> {
        let (sink, stream) = framed.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Self {
            id,
            address,
            state: AtomicU8::new(ConnectionState::Ready as u8),
            version,
            features,
            node_id,
            order: options.order,
            max_frame_size: options.max_frame_size,
            request_timeout: options.request_timeout,
            tls,
            next_request_id: AtomicI64::new(1),
            pending: Mutex::new(PendingTable::default()),
            outbound: Mutex::new(Some(outbound_tx)),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            failures: options.failures.clone(),
            created_at: Instant::now(),
        });

        let writer = tokio::spawn(write_loop(Arc::downgrade(&connection), sink, outbound_rx));
        let reader = tokio::spawn(read_loop(Arc::downgrade(&connection), stream));
        *connection.writer.lock() = Some(writer);
        *connection.reader.lock() = Some(reader);
        connection
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true if new requests are accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Returns the negotiated protocol version.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// Returns the node behind this connection, if the server reported it.
    pub fn node_id(&self) -> Option<Uuid> {
        self.node_id
    }

    /// Returns true if the server announced `feature`.
    pub fn has_feature(&self, feature: usize) -> bool {
        has_feature(&self.features, feature)
    }

    /// Returns true if traffic is encrypted.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Returns the byte order of this session.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Returns the number of requests awaiting a response, counting timed-out
    /// requests whose late answer is still expected.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns how long ago the handshake completed.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => Err(IgniteError::Usage(format!(
                "connection {} is closed",
                self.id
            ))),
            state => Err(IgniteError::Connection(format!(
                "connection {} to {} is {}",
                self.id, self.address, state
            ))),
        }
    }

    /// Sends `request` and waits for its response.
    ///
    /// Server-reported failures come back as an `Ok` response with
    /// [`Response::is_error`] set. A timeout abandons the wait only: the
    /// request stays in flight and a late answer is discarded on arrival.
    /// Tombstones for timed-out requests expire after another request
    /// timeout; more than [`MAX_ABANDONED_REQUESTS`] of them fail the
    /// connection.
    #[instrument(
        name = "connection.request",
        skip(self, request),
        fields(id = %self.id, op = request.op_name())
    )]
    pub async fn request(&self, request: &Request) -> Result<Response> {
        self.ensure_ready()?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = request.encode(request_id)?;
        if frame.len() > self.max_frame_size {
            return Err(IgniteError::Usage(format!(
                "request of {} bytes exceeds frame limit of {}",
                frame.len(),
                self.max_frame_size
            )));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        let queued = match self.ensure_ready() {
            Ok(()) => self
                .outbound
                .lock()
                .as_ref()
                .is_some_and(|outbound| outbound.send(frame).is_ok()),
            Err(_) => false,
        };
        if !queued {
            self.pending.lock().remove(request_id);
            return Err(self.ensure_ready().err().unwrap_or_else(|| {
                IgniteError::Connection(format!("connection {} stopped writing", self.id))
            }));
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IgniteError::Connection(format!(
                "connection {} dropped request {}",
                self.id, request_id
            ))),
            Err(_) => {
                tracing::debug!(request_id, timeout = ?self.request_timeout, "request timed out");
                let abandoned = self
                    .pending
                    .lock()
                    .abandon(request_id, Instant::now() + self.request_timeout);
                if abandoned > MAX_ABANDONED_REQUESTS {
                    self.fail(IgniteError::Timeout(format!(
                        "{} requests left unanswered",
                        abandoned
                    )));
                }
                Err(IgniteError::Timeout(format!(
                    "no response to request {} within {:?}",
                    request_id, self.request_timeout
                )))
            }
        }
    }

    fn complete(&self, response: Response) -> Result<()> {
        let request_id = response.request_id();
        let slot = self.pending.lock().remove(request_id);
        match slot {
            Some(PendingSlot::Waiting(tx)) => {
                if tx.send(Ok(response)).is_err() {
                    tracing::debug!(id = %self.id, request_id, "discarding response to abandoned request");
                }
                Ok(())
            }
            Some(PendingSlot::Abandoned { .. }) => {
                tracing::debug!(id = %self.id, request_id, "discarding late response");
                Ok(())
            }
            None if request_id > 0 && request_id < self.next_request_id.load(Ordering::Relaxed) => {
                tracing::debug!(id = %self.id, request_id, "discarding response after its tombstone expired");
                Ok(())
            }
            None => Err(IgniteError::Protocol(format!(
                "response for unknown request id {}",
                request_id
            ))),
        }
    }

    fn drain_pending(&self, reason: &str) {
        let drained = self.pending.lock().drain();
        if !drained.is_empty() {
            tracing::debug!(id = %self.id, count = drained.len(), "failing pending requests");
        }
        for tx in drained {
            let _ = tx.send(Err(IgniteError::Connection(reason.to_string())));
        }
    }

    /// Marks the connection broken and fails every pending request.
    pub(crate) fn fail(&self, error: IgniteError) {
        let transitioned = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match ConnectionState::from_u8(raw) {
                    ConnectionState::Closing | ConnectionState::Failed | ConnectionState::Closed => None,
                    _ => Some(ConnectionState::Failed as u8),
                }
            })
            .is_ok();
        if !transitioned {
            return;
        }

        tracing::warn!(id = %self.id, address = %self.address, error = %error, "connection failed");
        self.outbound.lock().take();
        self.drain_pending(&format!("connection {} to {} failed: {}", self.id, self.address, error));
        if let Some(failures) = &self.failures {
            let _ = failures.send(self.id);
        }
    }

    /// Shuts the session down. Pending requests fail with a connection error.
    ///
    /// Calling this more than once is harmless.
    #[instrument(name = "connection.close", skip(self), fields(id = %self.id))]
    pub async fn close(&self) {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match ConnectionState::from_u8(raw) {
                    ConnectionState::Closing | ConnectionState::Closed => None,
                    _ => Some(ConnectionState::Closing as u8),
                }
            });
        if previous.is_err() {
            return;
        }

        self.outbound.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                tracing::debug!("writer did not drain in time");
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.drain_pending(&format!("connection {} closed", self.id));
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
        tracing::debug!(address = %self.address, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.get_mut().take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

async fn write_loop(
    connection: Weak<Connection>,
    mut sink: SplitSink<FramedTransport, Bytes>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = outbound.recv().await {
        let mut result = sink.feed(frame).await;
        while result.is_ok() {
            match outbound.try_recv() {
                Ok(next) => result = sink.feed(next).await,
                Err(_) => break,
            }
        }
        if let Err(e) = result.and(sink.flush().await) {
            if let Some(connection) = connection.upgrade() {
                connection.fail(IgniteError::Connection(format!("write failed: {}", e)));
            }
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(connection: Weak<Connection>, mut stream: SplitStream<FramedTransport>) {
    let error = loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break e,
            None => break IgniteError::Connection("closed by peer".to_string()),
        };
        let Some(conn) = connection.upgrade() else {
            return;
        };
        let outcome = Response::parse(frame.freeze(), conn.order).and_then(|r| conn.complete(r));
        if let Err(e) = outcome {
            break e;
        }
    };
    if let Some(conn) = connection.upgrade() {
        conn.fail(error);
    }
}
