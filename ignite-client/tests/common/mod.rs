//! In-process mock node speaking the thin client protocol.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use ignite_client::{ClientConfig, ClientConfigBuilder};
use ignite_core::protocol::{
    AffinityVersion, FrameCodec, ProtocolVersion, OP_CACHE_CLEAR, OP_CACHE_CONTAINS_KEY,
    OP_CACHE_GET, OP_CACHE_GET_ALL, OP_CACHE_GET_SIZE, OP_CACHE_PUT, OP_CACHE_REMOVE_KEY,
    OP_QUERY_SCAN, OP_QUERY_SCAN_CURSOR_GET_PAGE, OP_QUERY_SQL_FIELDS,
    OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE, OP_RESOURCE_CLOSE, RESPONSE_FLAG_AFFINITY_CHANGED,
    RESPONSE_FLAG_ERROR, STATUS_AUTH_FAILED,
};
use ignite_core::partition::partition_for_hash;
use ignite_core::{ByteOrder, DataInput, DataOutput, ObjectDataInput, ObjectDataOutput, WireValue};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use uuid::Uuid;

const ORDER: ByteOrder = ByteOrder::LittleEndian;

/// A decoded request frame.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub op: i16,
    pub id: i64,
    pub payload: Bytes,
}

impl Incoming {
    pub fn reader(&self) -> ObjectDataInput<'_> {
        ObjectDataInput::with_order(&self.payload, ORDER)
    }

    /// Reader positioned after the cache id and flags byte.
    pub fn after_cache_header(&self) -> ObjectDataInput<'_> {
        let mut input = self.reader();
        input.skip(5).unwrap();
        input
    }

    pub fn cache_id(&self) -> i32 {
        self.reader().read_int().unwrap()
    }
}

/// What the mock sends back for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok {
        body: Bytes,
        affinity: Option<AffinityVersion>,
    },
    Error {
        status: i32,
        message: String,
    },
    Delayed(Duration, Box<Reply>),
    Silent,
    Disconnect,
}

impl Reply {
    pub fn empty() -> Self {
        Self::ok(Bytes::new())
    }

    pub fn ok(body: Bytes) -> Self {
        Self::Ok {
            body,
            affinity: None,
        }
    }

    pub fn value(value: WireValue) -> Self {
        Self::ok(body(|out| value.write_to(out).unwrap()))
    }

    pub fn with_affinity(self, version: AffinityVersion) -> Self {
        match self {
            Self::Ok { body, .. } => Self::Ok {
                body,
                affinity: Some(version),
            },
            other => other,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Incoming) -> Reply + Send + Sync>;

pub fn body(f: impl FnOnce(&mut ObjectDataOutput)) -> Bytes {
    let mut out = ObjectDataOutput::with_order(ORDER);
    f(&mut out);
    out.freeze()
}

struct Settings {
    node_id: Uuid,
    version: ProtocolVersion,
    features: Vec<u8>,
    credentials: Option<(String, String)>,
    reorder_batch: usize,
    handler: Handler,
}

pub struct MockNodeBuilder {
    node_id: Uuid,
    version: ProtocolVersion,
    features: Vec<u8>,
    credentials: Option<(String, String)>,
    reorder_batch: usize,
    handler: Handler,
}

impl MockNodeBuilder {
    pub fn node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = node_id;
        self
    }

    /// Highest version the node accepts.
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn features(mut self, mask: &[u8]) -> Self {
        self.features = mask.to_vec();
        self
    }

    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Holds replies until `n` are ready and sends them in reverse order.
    pub fn reorder_batch(mut self, n: usize) -> Self {
        self.reorder_batch = n.max(1);
        self
    }

    pub fn handler(mut self, handler: impl Fn(&Incoming) -> Reply + Send + Sync + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub async fn start(self) -> MockNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let settings = Arc::new(Settings {
            node_id: self.node_id,
            version: self.version,
            features: self.features,
            credentials: self.credentials,
            reorder_batch: self.reorder_batch,
            handler: self.handler,
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (shutdown, _) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&settings),
            Arc::clone(&log),
            Arc::clone(&accepted),
            shutdown.subscribe(),
        ));

        MockNode {
            addr,
            node_id: settings.node_id,
            log,
            accepted,
            shutdown,
            accept_task,
        }
    }
}

pub struct MockNode {
    addr: SocketAddr,
    node_id: Uuid,
    log: Arc<Mutex<Vec<i16>>>,
    accepted: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl MockNode {
    pub fn builder() -> MockNodeBuilder {
        MockNodeBuilder {
            node_id: Uuid::new_v4(),
            version: ProtocolVersion::V1_7_0,
            features: vec![0b0000_0100],
            credentials: None,
            reorder_batch: 1,
            handler: Arc::new(|_| Reply::empty()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Op codes received after the handshake, in arrival order.
    pub fn ops(&self) -> Vec<i16> {
        self.log.lock().clone()
    }

    pub fn count(&self, op: i16) -> usize {
        self.log.lock().iter().filter(|&&o| o == op).count()
    }

    /// Number of accepted TCP connections, handshakes included.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Stops accepting and drops every open connection.
    pub fn kill(&self) {
        self.accept_task.abort();
        self.shutdown.send_replace(true);
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn accept_loop(
    listener: TcpListener,
    settings: Arc<Settings>,
    log: Arc<Mutex<Vec<i16>>>,
    accepted: Arc<AtomicUsize>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        accepted.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(
            socket,
            Arc::clone(&settings),
            Arc::clone(&log),
            shutdown.clone(),
        ));
    }
}

async fn serve(
    socket: TcpStream,
    settings: Arc<Settings>,
    log: Arc<Mutex<Vec<i16>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(socket, FrameCodec::new(ORDER));
    let Some(Ok(handshake)) = framed.next().await else {
        return;
    };
    let (reply, accepted) = handshake_reply(&handshake, &settings);
    if framed.send(reply).await.is_err() || !accepted {
        return;
    }

    let mut held = Vec::new();
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => return,
            frame = framed.next() => match frame {
                Some(Ok(frame)) => frame.freeze(),
                _ => return,
            },
        };
        let mut input = ObjectDataInput::with_order(&frame, ORDER);
        let op = input.read_short().unwrap();
        let id = input.read_long().unwrap();
        let incoming = Incoming {
            op,
            id,
            payload: frame.slice(10..),
        };
        log.lock().push(op);

        let mut reply = (settings.handler)(&incoming);
        while let Reply::Delayed(delay, inner) = reply {
            tokio::time::sleep(delay).await;
            reply = *inner;
        }
        match reply {
            Reply::Disconnect => return,
            Reply::Silent => continue,
            reply => held.push(response_frame(id, reply)),
        }
        if held.len() >= settings.reorder_batch {
            held.reverse();
            for frame in held.drain(..) {
                if framed.feed(frame).await.is_err() {
                    return;
                }
            }
            if framed.flush().await.is_err() {
                return;
            }
        }
    }
}

fn handshake_reply(frame: &[u8], settings: &Settings) -> (Bytes, bool) {
    let mut input = ObjectDataInput::with_order(frame, ORDER);
    input.read_u8().unwrap();
    let requested = ProtocolVersion::new(
        input.read_short().unwrap(),
        input.read_short().unwrap(),
        input.read_short().unwrap(),
    );
    input.read_u8().unwrap();

    if requested > settings.version {
        return (rejected(settings.version, "unsupported protocol version", 0), false);
    }
    if requested.supports_features() {
        WireValue::read_from(&mut input).unwrap();
    }
    if let Some((username, password)) = &settings.credentials {
        let given = if input.remaining() > 0 {
            (
                WireValue::read_from(&mut input).unwrap(),
                WireValue::read_from(&mut input).unwrap(),
            )
        } else {
            (WireValue::Null, WireValue::Null)
        };
        if given != (WireValue::String(username.clone()), WireValue::String(password.clone())) {
            return (rejected(requested, "Authentication failed", STATUS_AUTH_FAILED), false);
        }
    }

    let reply = body(|out| {
        out.write_bool(true).unwrap();
        if requested.supports_features() {
            WireValue::ByteArray(settings.features.clone()).write_to(out).unwrap();
        }
        if requested.supports_node_id() {
            WireValue::Uuid(settings.node_id).write_to(out).unwrap();
        }
    });
    (reply, true)
}

fn rejected(version: ProtocolVersion, message: &str, status: i32) -> Bytes {
    body(|out| {
        out.write_bool(false).unwrap();
        out.write_short(version.major).unwrap();
        out.write_short(version.minor).unwrap();
        out.write_short(version.patch).unwrap();
        WireValue::String(message.to_string()).write_to(out).unwrap();
        out.write_int(status).unwrap();
    })
}

fn response_frame(id: i64, reply: Reply) -> Bytes {
    body(|out| {
        out.write_long(id).unwrap();
        match reply {
            Reply::Ok { body, affinity } => {
                match affinity {
                    Some(version) => {
                        out.write_short(RESPONSE_FLAG_AFFINITY_CHANGED).unwrap();
                        out.write_long(version.major).unwrap();
                        out.write_int(version.minor).unwrap();
                    }
                    None => out.write_short(0).unwrap(),
                }
                out.write_bytes(&body).unwrap();
            }
            Reply::Error { status, message } => {
                out.write_short(RESPONSE_FLAG_ERROR).unwrap();
                out.write_int(status).unwrap();
                WireValue::String(message).write_to(out).unwrap();
            }
            _ => out.write_short(0).unwrap(),
        }
    })
}

/// Fast-failing client configuration for `addrs`.
pub fn config(addrs: &[SocketAddr]) -> ClientConfigBuilder {
    ClientConfigBuilder::new()
        .addresses(addrs.iter().copied())
        .connection_timeout(Duration::from_millis(500))
        .request_timeout(Duration::from_secs(2))
        .retry(|r| {
            r.initial_backoff(Duration::from_millis(20))
                .max_backoff(Duration::from_millis(200))
                .max_retries(3)
        })
}

pub fn build(builder: ClientConfigBuilder) -> ClientConfig {
    builder.build().unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Body of a partitions response mapping `cache_ids` onto `owners`.
pub fn partitions_body(
    version: AffinityVersion,
    cache_ids: &[i32],
    owners: &[(Uuid, Vec<i32>)],
) -> Bytes {
    body(|out| {
        out.write_long(version.major).unwrap();
        out.write_int(version.minor).unwrap();
        out.write_int(1).unwrap();
        out.write_bool(true).unwrap();
        out.write_int(cache_ids.len() as i32).unwrap();
        for &cache_id in cache_ids {
            out.write_int(cache_id).unwrap();
            out.write_int(0).unwrap();
        }
        out.write_int(owners.len() as i32).unwrap();
        for (node, partitions) in owners {
            WireValue::Uuid(*node).write_to(out).unwrap();
            out.write_int(partitions.len() as i32).unwrap();
            for &p in partitions {
                out.write_int(p).unwrap();
            }
        }
    })
}

/// Key-value operations over a store that several nodes may share.
#[derive(Debug, Clone, Default)]
pub struct KvStore {
    entries: Arc<Mutex<HashMap<Vec<u8>, (WireValue, WireValue)>>>,
}

impl KvStore {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn insert(&self, key: WireValue, value: WireValue) {
        let encoded = key.encode(ORDER).unwrap().to_vec();
        self.entries.lock().insert(encoded, (key, value));
    }

    pub fn handle(&self, req: &Incoming) -> Option<Reply> {
        let mut input = req.after_cache_header();
        let reply = match req.op {
            OP_CACHE_PUT => {
                let key = WireValue::read_from(&mut input).unwrap();
                let value = WireValue::read_from(&mut input).unwrap();
                self.insert(key, value);
                Reply::empty()
            }
            OP_CACHE_GET => {
                let key = WireValue::read_from(&mut input).unwrap();
                let encoded = key.encode(ORDER).unwrap().to_vec();
                let value = self.entries.lock().get(&encoded).map(|(_, v)| v.clone());
                Reply::value(value.unwrap_or(WireValue::Null))
            }
            OP_CACHE_REMOVE_KEY | OP_CACHE_CONTAINS_KEY => {
                let key = WireValue::read_from(&mut input).unwrap();
                let encoded = key.encode(ORDER).unwrap().to_vec();
                let present = if req.op == OP_CACHE_REMOVE_KEY {
                    self.entries.lock().remove(&encoded).is_some()
                } else {
                    self.entries.lock().contains_key(&encoded)
                };
                Reply::ok(body(|out| out.write_bool(present).unwrap()))
            }
            OP_CACHE_GET_ALL => {
                let count = input.read_int().unwrap();
                let entries = self.entries.lock();
                let mut found = Vec::new();
                for _ in 0..count {
                    let key = WireValue::read_from(&mut input).unwrap();
                    if let Some(entry) = entries.get(&key.encode(ORDER).unwrap().to_vec()) {
                        found.push(entry.clone());
                    }
                }
                Reply::ok(body(|out| {
                    out.write_int(found.len() as i32).unwrap();
                    for (k, v) in &found {
                        k.write_to(out).unwrap();
                        v.write_to(out).unwrap();
                    }
                }))
            }
            OP_CACHE_GET_SIZE => {
                let size = self.entries.lock().len() as i64;
                Reply::ok(body(|out| out.write_long(size).unwrap()))
            }
            OP_CACHE_CLEAR => {
                self.entries.lock().clear();
                Reply::empty()
            }
            _ => return None,
        };
        Some(reply)
    }
}

/// Serves scan and SQL-fields cursors over fixed data.
#[derive(Debug, Clone)]
pub struct CursorStore {
    entries: Vec<(WireValue, WireValue)>,
    columns: Vec<String>,
    rows: Vec<Vec<WireValue>>,
    partitions: usize,
    open: Arc<Mutex<HashMap<i64, (VecDeque<Vec<WireValue>>, usize)>>>,
    next_id: Arc<AtomicI64>,
}

impl CursorStore {
    pub fn with_entries(entries: Vec<(WireValue, WireValue)>) -> Self {
        Self {
            entries,
            columns: Vec::new(),
            rows: Vec::new(),
            partitions: 0,
            open: Arc::default(),
            next_id: Arc::new(AtomicI64::new(100)),
        }
    }

    pub fn with_rows(columns: &[&str], rows: Vec<Vec<WireValue>>) -> Self {
        Self {
            entries: Vec::new(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            partitions: 0,
            open: Arc::default(),
            next_id: Arc::new(AtomicI64::new(100)),
        }
    }

    /// Spreads integer keys over `partitions` so scans can target one.
    pub fn partitioned(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    /// Partition holding an integer key.
    pub fn partition_of(&self, key: &WireValue) -> usize {
        let hash = match key {
            WireValue::Int(i) => *i,
            _ => 0,
        };
        partition_for_hash(hash, self.partitions).unwrap()
    }

    /// Cursors the server still holds.
    pub fn open_cursors(&self) -> usize {
        self.open.lock().len()
    }

    fn write_page(&self, out: &mut ObjectDataOutput, id: i64) {
        let mut open = self.open.lock();
        let Some((remaining, page_size)) = open.get_mut(&id) else {
            return;
        };
        let take = (*page_size).min(remaining.len());
        out.write_int(take as i32).unwrap();
        for row in remaining.drain(..take) {
            for value in row {
                value.write_to(out).unwrap();
            }
        }
        let more = !remaining.is_empty();
        out.write_bool(more).unwrap();
        if !more {
            open.remove(&id);
        }
    }

    fn open_cursor(&self, rows: VecDeque<Vec<WireValue>>, page_size: usize) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.lock().insert(id, (rows, page_size));
        id
    }

    pub fn handle(&self, req: &Incoming) -> Option<Reply> {
        let reply = match req.op {
            OP_QUERY_SCAN => {
                let mut input = req.after_cache_header();
                WireValue::read_from(&mut input).unwrap();
                let page_size = input.read_int().unwrap() as usize;
                let partition = input.read_int().unwrap();
                let rows = self
                    .entries
                    .iter()
                    .filter(|(k, _)| {
                        partition < 0 || self.partition_of(k) == partition as usize
                    })
                    .map(|(k, v)| vec![k.clone(), v.clone()])
                    .collect();
                let id = self.open_cursor(rows, page_size);
                Reply::ok(body(|out| {
                    out.write_long(id).unwrap();
                    self.write_page(out, id);
                }))
            }
            OP_QUERY_SQL_FIELDS => {
                let mut input = req.after_cache_header();
                WireValue::read_from(&mut input).unwrap();
                let page_size = input.read_int().unwrap() as usize;
                input.read_int().unwrap();
                WireValue::read_from(&mut input).unwrap();
                for _ in 0..input.read_int().unwrap() {
                    WireValue::read_from(&mut input).unwrap();
                }
                input.skip(1 + 6 + 8).unwrap();
                let include_names = input.read_bool().unwrap();

                let id = self.open_cursor(self.rows.iter().cloned().collect(), page_size);
                Reply::ok(body(|out| {
                    out.write_long(id).unwrap();
                    out.write_int(self.columns.len() as i32).unwrap();
                    if include_names {
                        for name in &self.columns {
                            WireValue::String(name.clone()).write_to(out).unwrap();
                        }
                    }
                    self.write_page(out, id);
                }))
            }
            OP_QUERY_SCAN_CURSOR_GET_PAGE | OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE => {
                let id = req.reader().read_long().unwrap();
                if !self.open.lock().contains_key(&id) {
                    return Some(Reply::Error {
                        status: 1,
                        message: format!("cursor {} not found", id),
                    });
                }
                Reply::ok(body(|out| self.write_page(out, id)))
            }
            OP_RESOURCE_CLOSE => {
                let id = req.reader().read_long().unwrap();
                match self.open.lock().remove(&id) {
                    Some(_) => Reply::empty(),
                    None => Reply::Error {
                        status: 1,
                        message: format!("resource {} not found", id),
                    },
                }
            }
            _ => return None,
        };
        Some(reply)
    }
}
