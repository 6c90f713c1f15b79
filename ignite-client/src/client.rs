//! Client entry point.

use std::sync::{Arc, Weak};

use ignite_core::protocol::{
    Request, OP_CACHE_CREATE_WITH_NAME, OP_CACHE_DESTROY, OP_CACHE_GET_NAMES,
    OP_CACHE_GET_OR_CREATE_WITH_NAME, OP_GET_BINARY_TYPE, OP_PUT_BINARY_TYPE,
};
use ignite_core::{
    ByteOrder, ComplexType, DataInput, DataOutput, Deserializable, FieldDescriptor, IgniteError,
    ObjectDataInput, Result, TypeCode, WireValue,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::cache::{Cache, CacheDescriptor};
use crate::cluster::{Cluster, TopologyTracker};
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionPool, NodeDiscovery};
use crate::router::Router;

/// A connection to an Ignite cluster.
///
/// The client exclusively owns its connection pool, topology tracker and
/// router. Handles obtained from it ([`Cache`], [`Cluster`], cursors) share
/// those and stop working once the client is closed.
///
/// # Example
///
/// ```no_run
/// use ignite_client::{ClientConfig, IgniteClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .add_address("127.0.0.1:10800".parse()?)
///         .build()?;
///     let client = IgniteClient::connect(config).await?;
///
///     let cache = client.get_or_create_cache::<i32, String>("people").await?;
///     cache.put(&1, &"Ann".to_string()).await?;
///     assert_eq!(cache.get(&1).await?, Some("Ann".to_string()));
///
///     client.close().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct IgniteClient {
    config: Arc<ClientConfig>,
    router: Arc<Router>,
    node_tracker: JoinHandle<()>,
}

impl IgniteClient {
    /// Connects to the configured seed addresses.
    ///
    /// # Errors
    ///
    /// Fails when no node completes the handshake. Rejected credentials
    /// surface as [`IgniteError::Authentication`].
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let pool = ConnectionPool::from_config(&config);
        Self::start(config, pool).await
    }

    /// Connects to the nodes reported by `discovery`.
    pub async fn connect_with_discovery(
        config: ClientConfig,
        discovery: impl NodeDiscovery + 'static,
    ) -> Result<Self> {
        let pool = ConnectionPool::new(&config, discovery);
        Self::start(config, pool).await
    }

    #[instrument(name = "client.start", skip_all)]
    async fn start(config: ClientConfig, pool: ConnectionPool) -> Result<Self> {
        let events = pool.subscribe();
        pool.start().await?;

        let topology = TopologyTracker::new(config.network().byte_order());
        for connection in pool.connections().iter() {
            if let Some(node) = connection.node_id() {
                topology.node_reachable(node, connection.address());
            }
        }
        let router = Arc::new(Router::new(
            pool,
            topology,
            config.network().partition_awareness(),
        ));
        let node_tracker = tokio::spawn(track_nodes(Arc::downgrade(&router), events));

        tracing::info!(
            connection_count = router.pool().len(),
            partition_awareness = router.partition_awareness(),
            "connected to Ignite cluster"
        );

        Ok(Self {
            config: Arc::new(config),
            router,
            node_tracker,
        })
    }

    /// Returns the configuration the client was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the request router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    fn order(&self) -> ByteOrder {
        self.config.network().byte_order()
    }

    /// Returns a handle to an existing cache. No request is sent.
    pub fn cache<K, V>(&self, name: &str) -> Cache<K, V> {
        Cache::new(CacheDescriptor::new(name), Arc::clone(&self.router))
    }

    /// Returns a handle to a cache described by `descriptor`.
    pub fn cache_with_descriptor<K, V>(&self, descriptor: CacheDescriptor) -> Cache<K, V> {
        Cache::new(descriptor, Arc::clone(&self.router))
    }

    /// Creates the cache, failing if it already exists.
    #[instrument(name = "client.create_cache", skip(self))]
    pub async fn create_cache<K, V>(&self, name: &str) -> Result<Cache<K, V>> {
        let mut request = Request::new(OP_CACHE_CREATE_WITH_NAME, self.order());
        request.write(name)?;
        self.router.dispatch(&request, None).await?;
        Ok(self.cache(name))
    }

    /// Creates the cache unless it exists.
    #[instrument(name = "client.get_or_create_cache", skip(self))]
    pub async fn get_or_create_cache<K, V>(&self, name: &str) -> Result<Cache<K, V>> {
        let mut request = Request::new(OP_CACHE_GET_OR_CREATE_WITH_NAME, self.order());
        request.write(name)?;
        self.router.dispatch(&request, None).await?;
        Ok(self.cache(name))
    }

    /// Destroys the cache and its data.
    #[instrument(name = "client.destroy_cache", skip(self))]
    pub async fn destroy_cache(&self, name: &str) -> Result<()> {
        let mut request = Request::new(OP_CACHE_DESTROY, self.order());
        request.writer().write_int(CacheDescriptor::new(name).cache_id())?;
        self.router.dispatch(&request, None).await?;
        Ok(())
    }

    /// Lists the names of all caches.
    #[instrument(name = "client.cache_names", skip(self))]
    pub async fn cache_names(&self) -> Result<Vec<String>> {
        let request = Request::new(OP_CACHE_GET_NAMES, self.order());
        let response = self.router.dispatch(&request, None).await?;
        let mut input = response.reader();
        let count = input.read_len()?;
        let mut names = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            names.push(String::from_wire(WireValue::read_from(&mut input)?)?);
        }
        Ok(names)
    }

    /// Registers the metadata of `ty` so the server can read its fields.
    #[instrument(name = "client.register_type", skip_all, fields(type_name = ty.name()))]
    pub async fn register_type(&self, ty: &ComplexType) -> Result<()> {
        let request = put_type_request(ty, self.order())?;
        self.router.dispatch(&request, None).await?;
        tracing::debug!(type_id = ty.type_id(), "type registered");
        Ok(())
    }

    /// Fetches the metadata the cluster holds for `type_id`.
    ///
    /// Returns `Ok(None)` when no such type is registered. The result keeps
    /// the identifiers the cluster reported. Enum types come back without
    /// fields.
    #[instrument(name = "client.get_type", skip(self))]
    pub async fn get_type(&self, type_id: i32) -> Result<Option<ComplexType>> {
        let mut request = Request::new(OP_GET_BINARY_TYPE, self.order());
        request.writer().write_int(type_id)?;
        let response = self.router.dispatch(&request, None).await?;
        read_type(&mut response.reader())
    }

    /// Returns the cluster administration handle.
    pub fn cluster(&self) -> Cluster {
        Cluster::new(Arc::clone(&self.router))
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.router.pool().subscribe()
    }

    /// Returns the number of query cursors still open on the server.
    pub fn open_cursor_count(&self) -> usize {
        self.router.cursors().len()
    }

    /// Returns the number of pooled connections.
    pub fn connection_count(&self) -> usize {
        self.router.pool().len()
    }

    /// Releases open cursors, then closes every connection.
    ///
    /// Each cursor the server still holds gets a best-effort release request
    /// and its handle becomes closed. Pending requests fail with a connection
    /// error; later requests fail with a usage error.
    pub async fn close(&self) {
        tracing::info!("closing Ignite client");
        self.node_tracker.abort();
        let released = self.router.cursors().close_all().await;
        if released > 0 {
            tracing::debug!(cursors = released, "released open cursors");
        }
        self.router.pool().shutdown().await;
    }
}

impl Drop for IgniteClient {
    fn drop(&mut self) {
        self.node_tracker.abort();
    }
}

async fn track_nodes(router: Weak<Router>, mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Connected {
                address,
                node_id: Some(node),
                ..
            }) => {
                let Some(router) = router.upgrade() else {
                    return;
                };
                router.topology().node_reachable(node, address);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "connection events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn put_type_request(ty: &ComplexType, order: ByteOrder) -> Result<Request> {
    let field_count = i32::try_from(ty.fields().len())
        .map_err(|_| IgniteError::Usage(format!("type {} has too many fields", ty.name())))?;

    let mut request = Request::new(OP_PUT_BINARY_TYPE, order);
    request.writer().write_int(ty.type_id())?;
    request.write(ty.name())?;
    match ty.affinity_key_field() {
        Some(field) => request.write(field)?,
        None => request.write_value(&WireValue::Null)?,
    }

    request.writer().write_int(field_count)?;
    for field in ty.fields() {
        request.write(field.name())?;
        request.writer().write_int(i32::from(field.type_code().as_u8()))?;
        request.writer().write_int(field.id())?;
    }

    let out = request.writer();
    // not an enum; one schema
    out.write_bool(false)?;
    out.write_int(1)?;
    out.write_int(ty.schema_id())?;
    out.write_int(field_count)?;
    for field in ty.fields() {
        out.write_int(field.id())?;
    }
    Ok(request)
}

fn read_type(input: &mut ObjectDataInput<'_>) -> Result<Option<ComplexType>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    let type_id = input.read_int()?;
    let name = String::from_wire(WireValue::read_from(input)?)?;
    let affinity_key_field = Option::<String>::from_wire(WireValue::read_from(input)?)?;

    let field_count = input.read_len()?;
    let mut fields = Vec::with_capacity(field_count.min(1024));
    for _ in 0..field_count {
        let field = String::from_wire(WireValue::read_from(input)?)?;
        let code = input.read_int()?;
        let type_code = u8::try_from(code)
            .map_err(|_| IgniteError::Protocol(format!("field {}.{} has type code {}", name, field, code)))
            .and_then(TypeCode::from_u8)?;
        let id = input.read_int()?;
        fields.push(FieldDescriptor::new(field, id, type_code));
    }

    if input.read_bool()? {
        // enum literals and their ordinals
        for _ in 0..input.read_len()? {
            WireValue::read_from(input)?;
            input.read_int()?;
        }
    }

    // the schema listing the declared fields in order, if any
    let ids: Vec<i32> = fields.iter().map(FieldDescriptor::id).collect();
    let mut schema = None;
    for _ in 0..input.read_len()? {
        let schema_id = input.read_int()?;
        let count = input.read_len()?;
        let mut schema_fields = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            schema_fields.push(input.read_int()?);
        }
        if schema.is_none() && schema_fields == ids {
            schema = Some(schema_id);
        }
    }

    Ok(Some(ComplexType::from_metadata(type_id, name, fields, affinity_key_field, schema)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IgniteClient>();
    }

    #[test]
    fn test_put_type_layout() {
        let ty = ComplexType::builder("Person")
            .field("name", TypeCode::String)
            .field("companyId", TypeCode::Long)
            .affinity_key_field("companyId")
            .build()
            .unwrap();
        let request = put_type_request(&ty, ByteOrder::LittleEndian).unwrap();

        let mut input = ObjectDataInput::with_order(request.payload(), ByteOrder::LittleEndian);
        assert_eq!(input.read_int().unwrap(), ty.type_id());
        assert_eq!(
            WireValue::read_from(&mut input).unwrap(),
            WireValue::String("Person".into())
        );
        assert_eq!(
            WireValue::read_from(&mut input).unwrap(),
            WireValue::String("companyId".into())
        );
        assert_eq!(input.read_int().unwrap(), 2);
        for field in ty.fields() {
            assert_eq!(
                WireValue::read_from(&mut input).unwrap(),
                WireValue::String(field.name().into())
            );
            assert_eq!(input.read_int().unwrap(), i32::from(field.type_code().as_u8()));
            assert_eq!(input.read_int().unwrap(), field.id());
        }
        assert!(!input.read_bool().unwrap());
        assert_eq!(input.read_int().unwrap(), 1);
        assert_eq!(input.read_int().unwrap(), ty.schema_id());
        assert_eq!(input.read_int().unwrap(), 2);
        input.skip(8).unwrap();
        assert_eq!(input.remaining(), 0);
    }

    fn type_response(ty: &ComplexType) -> Vec<u8> {
        let put = put_type_request(ty, ByteOrder::LittleEndian).unwrap();
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(put.payload());
        bytes
    }

    #[test]
    fn test_read_type_matches_registration() {
        let ty = ComplexType::builder("Person")
            .field("name", TypeCode::String)
            .field("companyId", TypeCode::Long)
            .affinity_key_field("companyId")
            .build()
            .unwrap();
        let bytes = type_response(&ty);
        let mut input = ObjectDataInput::with_order(&bytes, ByteOrder::LittleEndian);
        assert_eq!(read_type(&mut input).unwrap(), Some(ty));
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_read_type_missing() {
        let mut input = ObjectDataInput::with_order(&[0u8], ByteOrder::LittleEndian);
        assert_eq!(read_type(&mut input).unwrap(), None);
    }

    #[test]
    fn test_read_type_rejects_unknown_field_code() {
        let ty = ComplexType::builder("Point")
            .field("x", TypeCode::Int)
            .build()
            .unwrap();
        let mut bytes = type_response(&ty);
        // exists flag, type id, "Point", null affinity field, field count, "x"
        let code_at = 1 + 4 + (1 + 4 + 5) + 1 + 4 + (1 + 4 + 1);
        assert_eq!(bytes[code_at], TypeCode::Int.as_u8());
        bytes[code_at..code_at + 4].copy_from_slice(&300i32.to_le_bytes());
        let mut input = ObjectDataInput::with_order(&bytes, ByteOrder::LittleEndian);
        assert!(matches!(read_type(&mut input), Err(IgniteError::Protocol(_))));
    }
}
