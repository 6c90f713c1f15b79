//! Blocking facade over the async client.
//!
//! [`BlockingClient`] owns a small tokio runtime and drives every call to
//! completion on it, so it can be used from ordinary threads. Calls must not
//! be made from inside an async context.
//!
//! ```no_run
//! use ignite_client::blocking::BlockingClient;
//! use ignite_client::query::ScanQuery;
//! use ignite_client::ClientConfig;
//!
//! # fn main() -> ignite_client::Result<()> {
//! let client = BlockingClient::connect(ClientConfig::default())?;
//! let cache = client.get_or_create_cache::<i32, String>("people")?;
//! cache.put(&1, &"Ann".to_string())?;
//! for entry in cache.scan(ScanQuery::new())? {
//!     let (key, value) = entry?;
//!     println!("{:?} => {:?}", key, value);
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use ignite_core::{ComplexType, Deserializable, IgniteError, Result, Serializable, WireValue};
use tokio::runtime::{Builder, Runtime};

use crate::cache::{Cache, PeekMode};
use crate::client::IgniteClient;
use crate::cluster::ClusterState;
use crate::config::ClientConfig;
use crate::query::{
    Cursor, CursorRow, EntryCursor, FieldsCursor, ScanQuery, SqlFieldsQuery, SqlQuery,
};

fn runtime() -> Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("ignite-client")
        .enable_all()
        .build()
        .map_err(IgniteError::from)
}

/// Blocking counterpart of [`IgniteClient`].
#[derive(Debug)]
pub struct BlockingClient {
    client: IgniteClient,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    /// Connects to the configured seed addresses.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let runtime = Arc::new(runtime()?);
        let client = runtime.block_on(IgniteClient::connect(config))?;
        Ok(Self { client, runtime })
    }

    /// Returns the async client driven by this handle.
    pub fn as_async(&self) -> &IgniteClient {
        &self.client
    }

    fn wrap<K, V>(&self, cache: Cache<K, V>) -> BlockingCache<K, V> {
        BlockingCache {
            cache,
            runtime: Arc::clone(&self.runtime),
        }
    }

    /// Returns a handle to an existing cache.
    pub fn cache<K, V>(&self, name: &str) -> BlockingCache<K, V> {
        self.wrap(self.client.cache(name))
    }

    /// Creates the cache, failing if it already exists.
    pub fn create_cache<K, V>(&self, name: &str) -> Result<BlockingCache<K, V>> {
        let cache = self.runtime.block_on(self.client.create_cache(name))?;
        Ok(self.wrap(cache))
    }

    /// Creates the cache unless it exists.
    pub fn get_or_create_cache<K, V>(&self, name: &str) -> Result<BlockingCache<K, V>> {
        let cache = self.runtime.block_on(self.client.get_or_create_cache(name))?;
        Ok(self.wrap(cache))
    }

    /// Destroys the cache and its data.
    pub fn destroy_cache(&self, name: &str) -> Result<()> {
        self.runtime.block_on(self.client.destroy_cache(name))
    }

    /// Lists the names of all caches.
    pub fn cache_names(&self) -> Result<Vec<String>> {
        self.runtime.block_on(self.client.cache_names())
    }

    /// Registers the metadata of `ty`.
    pub fn register_type(&self, ty: &ComplexType) -> Result<()> {
        self.runtime.block_on(self.client.register_type(ty))
    }

    /// Fetches the metadata the cluster holds for `type_id`.
    pub fn get_type(&self, type_id: i32) -> Result<Option<ComplexType>> {
        self.runtime.block_on(self.client.get_type(type_id))
    }

    /// Reads the cluster state.
    pub fn cluster_state(&self) -> Result<ClusterState> {
        self.runtime.block_on(self.client.cluster().state())
    }

    /// Activates the cluster.
    pub fn activate(&self) -> Result<()> {
        self.runtime.block_on(self.client.cluster().activate())
    }

    /// Deactivates the cluster.
    pub fn deactivate(&self) -> Result<()> {
        self.runtime.block_on(self.client.cluster().deactivate())
    }

    /// Closes every connection.
    pub fn close(&self) {
        self.runtime.block_on(self.client.close());
    }
}

/// Blocking counterpart of [`Cache`].
pub struct BlockingCache<K = WireValue, V = WireValue> {
    cache: Cache<K, V>,
    runtime: Arc<Runtime>,
}

impl<K, V> Clone for BlockingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<K, V> fmt::Debug for BlockingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingCache").field("cache", &self.cache).finish()
    }
}

impl<K, V> BlockingCache<K, V> {
    /// Returns the cache name.
    pub fn name(&self) -> &str {
        self.cache.name()
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<()> {
        self.runtime.block_on(self.cache.clear())
    }

    /// Counts entries in the given peek modes.
    pub fn size(&self, peek_modes: &[PeekMode]) -> Result<i64> {
        self.runtime.block_on(self.cache.size(peek_modes))
    }

    /// Starts a scan query.
    pub fn scan(&self, query: ScanQuery) -> Result<BlockingCursor<EntryCursor>> {
        let cursor = self.runtime.block_on(self.cache.scan(query))?;
        Ok(BlockingCursor::new(cursor, Arc::clone(&self.runtime)))
    }

    /// Starts a SQL query.
    pub fn sql(&self, query: SqlQuery) -> Result<BlockingCursor<EntryCursor>> {
        let cursor = self.runtime.block_on(self.cache.sql(query))?;
        Ok(BlockingCursor::new(cursor, Arc::clone(&self.runtime)))
    }

    /// Starts a SQL-fields query.
    pub fn sql_fields(&self, query: SqlFieldsQuery) -> Result<BlockingCursor<FieldsCursor>> {
        let cursor = self.runtime.block_on(self.cache.sql_fields(query))?;
        Ok(BlockingCursor::new(cursor, Arc::clone(&self.runtime)))
    }
}

impl<K, V> BlockingCache<K, V>
where
    K: Serializable + Deserializable,
    V: Serializable + Deserializable,
{
    /// Stores `value` under `key`.
    pub fn put(&self, key: &K, value: &V) -> Result<()> {
        self.runtime.block_on(self.cache.put(key, value))
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.runtime.block_on(self.cache.get(key))
    }

    /// Reads several entries at once.
    pub fn get_all(&self, keys: &[K]) -> Result<Vec<(K, V)>> {
        self.runtime.block_on(self.cache.get_all(keys))
    }

    /// Removes `key`, returning true if it was present.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.runtime.block_on(self.cache.remove(key))
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.runtime.block_on(self.cache.contains_key(key))
    }
}

/// Iterator over a cursor, fetching pages as it goes.
///
/// Yields `Err` at most once and then ends. Dropping it before the end
/// releases the server-side cursor in the background.
#[derive(Debug)]
pub struct BlockingCursor<C> {
    cursor: Option<C>,
    runtime: Arc<Runtime>,
}

impl<T: CursorRow> BlockingCursor<Cursor<T>> {
    fn new(cursor: Cursor<T>, runtime: Arc<Runtime>) -> Self {
        Self {
            cursor: Some(cursor),
            runtime,
        }
    }

    /// Returns the underlying cursor, or `None` after an error ended it.
    pub fn cursor(&self) -> Option<&Cursor<T>> {
        self.cursor.as_ref()
    }

    /// Returns true while the server holds further pages.
    pub fn has_more(&self) -> bool {
        self.cursor.as_ref().is_some_and(Cursor::has_more)
    }

    /// Releases the server-side cursor.
    pub fn close(&mut self) -> Result<()> {
        match self.cursor.as_mut() {
            Some(cursor) => self.runtime.block_on(cursor.close()),
            None => Ok(()),
        }
    }
}

impl<T: CursorRow> Iterator for BlockingCursor<Cursor<T>> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        match self.runtime.block_on(cursor.next()) {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                let _guard = self.runtime.enter();
                self.cursor = None;
                Some(Err(e))
            }
        }
    }
}

impl<C> Drop for BlockingCursor<C> {
    fn drop(&mut self) {
        let _guard = self.runtime.enter();
        self.cursor.take();
    }
}
