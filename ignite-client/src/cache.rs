//! Key-value access to a single cache.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use ignite_core::protocol::{
    Request, OP_CACHE_CLEAR, OP_CACHE_CONTAINS_KEY, OP_CACHE_GET, OP_CACHE_GET_ALL,
    OP_CACHE_GET_SIZE, OP_CACHE_PUT, OP_CACHE_REMOVE_KEY,
};
use ignite_core::serialization::hash::{cache_id, entity_id};
use ignite_core::{
    DataInput, DataOutput, Deserializable, IgniteError, Result, Serializable, WireValue,
};
use tracing::instrument;

use crate::query::{EntryCursor, FieldsCursor, ScanQuery, SqlFieldsQuery, SqlQuery};
use crate::router::{AffinityHint, Router};

/// Identity of a cache as seen by the router.
///
/// The cache id is derived from the name. An affinity key field, when set,
/// names the field of complex keys whose value decides the partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheDescriptor {
    name: String,
    cache_id: i32,
    affinity_key_field: Option<String>,
}

impl CacheDescriptor {
    /// Creates a descriptor for the cache called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            cache_id: cache_id(&name),
            name,
            affinity_key_field: None,
        }
    }

    /// Routes complex keys by the value of `field`.
    pub fn with_affinity_key_field(mut self, field: impl Into<String>) -> Self {
        self.affinity_key_field = Some(field.into());
        self
    }

    /// Returns the cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cache id.
    pub fn cache_id(&self) -> i32 {
        self.cache_id
    }

    /// Returns the affinity key field name.
    pub fn affinity_key_field(&self) -> Option<&str> {
        self.affinity_key_field.as_deref()
    }

    /// Returns the id of the affinity key field.
    pub fn affinity_key_field_id(&self) -> Option<i32> {
        self.affinity_key_field.as_deref().map(entity_id)
    }
}

/// Subsets of entries counted by [`Cache::size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PeekMode {
    /// Every entry.
    All = 0,
    /// Near-cache entries.
    Near = 1,
    /// Entries on their primary node.
    Primary = 2,
    /// Backup copies.
    Backup = 3,
}

/// A typed handle to a cache.
///
/// Single-key operations are sent to the primary node of the key when
/// partition awareness is enabled.
pub struct Cache<K = WireValue, V = WireValue> {
    descriptor: CacheDescriptor,
    router: Arc<Router>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            router: Arc::clone(&self.router),
            _types: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.descriptor.name)
            .field("cache_id", &self.descriptor.cache_id)
            .finish()
    }
}

impl<K, V> Cache<K, V> {
    pub(crate) fn new(descriptor: CacheDescriptor, router: Arc<Router>) -> Self {
        Self {
            descriptor,
            router,
            _types: PhantomData,
        }
    }

    /// Returns the cache name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Returns the routing descriptor.
    pub fn descriptor(&self) -> &CacheDescriptor {
        &self.descriptor
    }

    /// Routes complex keys by the value of `field`.
    pub fn with_affinity_key_field(mut self, field: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_affinity_key_field(field);
        self
    }

    fn request(&self, op_code: i16) -> Result<Request> {
        Request::for_cache(
            op_code,
            self.descriptor.cache_id(),
            self.router.pool().options().byte_order(),
        )
    }

    /// Removes every entry.
    #[instrument(name = "cache.clear", skip(self), fields(cache = %self.descriptor.name))]
    pub async fn clear(&self) -> Result<()> {
        self.router.dispatch(&self.request(OP_CACHE_CLEAR)?, None).await?;
        Ok(())
    }

    /// Counts entries in the given peek modes; all entries when empty.
    #[instrument(name = "cache.size", skip(self), fields(cache = %self.descriptor.name))]
    pub async fn size(&self, peek_modes: &[PeekMode]) -> Result<i64> {
        let mut request = self.request(OP_CACHE_GET_SIZE)?;
        let count = i32::try_from(peek_modes.len())
            .map_err(|_| IgniteError::Usage("too many peek modes".to_string()))?;
        let out = request.writer();
        out.write_int(count)?;
        for mode in peek_modes {
            out.write_u8(*mode as u8)?;
        }
        let response = self.router.dispatch(&request, None).await?;
        response.reader().read_long()
    }

    /// Starts a scan query.
    pub async fn scan(&self, query: ScanQuery) -> Result<EntryCursor> {
        EntryCursor::scan(Arc::clone(&self.router), &self.descriptor, &query).await
    }

    /// Starts a SQL query returning whole entries.
    pub async fn sql(&self, query: SqlQuery) -> Result<EntryCursor> {
        EntryCursor::sql(Arc::clone(&self.router), &self.descriptor, &query).await
    }

    /// Starts a SQL-fields query.
    pub async fn sql_fields(&self, query: SqlFieldsQuery) -> Result<FieldsCursor> {
        FieldsCursor::sql_fields(Arc::clone(&self.router), &self.descriptor, &query).await
    }
}

impl<K, V> Cache<K, V>
where
    K: Serializable + Deserializable,
    V: Serializable + Deserializable,
{
    async fn keyed(&self, op_code: i16, key: &K, value: Option<&V>) -> Result<ignite_core::protocol::Response> {
        let key = key.to_wire()?;
        let mut request = self.request(op_code)?;
        request.write_value(&key)?;
        if let Some(value) = value {
            request.write(value)?;
        }
        let hint = AffinityHint::Key {
            cache: &self.descriptor,
            key: &key,
        };
        self.router.dispatch(&request, Some(hint)).await
    }

    /// Stores `value` under `key`.
    #[instrument(name = "cache.put", skip_all, fields(cache = %self.descriptor.name))]
    pub async fn put(&self, key: &K, value: &V) -> Result<()> {
        self.keyed(OP_CACHE_PUT, key, Some(value)).await?;
        Ok(())
    }

    /// Reads the value stored under `key`.
    #[instrument(name = "cache.get", skip_all, fields(cache = %self.descriptor.name))]
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let response = self.keyed(OP_CACHE_GET, key, None).await?;
        match WireValue::read_from(&mut response.reader())? {
            WireValue::Null => Ok(None),
            value => V::from_wire(value).map(Some),
        }
    }

    /// Removes `key`, returning true if it was present.
    #[instrument(name = "cache.remove", skip_all, fields(cache = %self.descriptor.name))]
    pub async fn remove(&self, key: &K) -> Result<bool> {
        let response = self.keyed(OP_CACHE_REMOVE_KEY, key, None).await?;
        response.reader().read_bool()
    }

    /// Returns true if `key` is present.
    #[instrument(name = "cache.contains_key", skip_all, fields(cache = %self.descriptor.name))]
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        let response = self.keyed(OP_CACHE_CONTAINS_KEY, key, None).await?;
        response.reader().read_bool()
    }

    /// Reads several entries at once. Missing keys are left out.
    #[instrument(name = "cache.get_all", skip_all, fields(cache = %self.descriptor.name, keys = keys.len()))]
    pub async fn get_all(&self, keys: &[K]) -> Result<Vec<(K, V)>> {
        let mut request = self.request(OP_CACHE_GET_ALL)?;
        let count = i32::try_from(keys.len())
            .map_err(|_| IgniteError::Usage("too many keys".to_string()))?;
        request.writer().write_int(count)?;
        for key in keys {
            request.write(key)?;
        }

        let response = self.router.dispatch(&request, None).await?;
        let mut input = response.reader();
        let count = input.read_len()?;
        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let key = K::from_wire(WireValue::read_from(&mut input)?)?;
            let value = V::from_wire(WireValue::read_from(&mut input)?)?;
            entries.push((key, value));
        }
        Ok(entries)
    }
}
