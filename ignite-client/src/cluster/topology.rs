//! Partition ownership and affinity computation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ignite_core::partition::{partition_for_hash, MAX_PARTITION_COUNT};
use ignite_core::protocol::{AffinityVersion, Request, Response, OP_CACHE_PARTITIONS};
use ignite_core::serialization::{AffinityHasher, JavaHasher};
use ignite_core::{ByteOrder, DataInput, DataOutput, IgniteError, Result, WireValue};
use parking_lot::{Mutex, RwLock};
use tracing::instrument;
use uuid::Uuid;

use crate::cache::CacheDescriptor;

/// Partition-to-node assignment of one cache.
///
/// Immutable once built; a refresh produces a new map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMap {
    cache_id: i32,
    version: AffinityVersion,
    partitions: Vec<Vec<Uuid>>,
    key_affinity_fields: HashMap<i32, i32>,
}

impl PartitionMap {
    /// Builds a map where `partitions[p]` lists the nodes of partition `p`, primary first.
    pub fn new(cache_id: i32, version: AffinityVersion, partitions: Vec<Vec<Uuid>>) -> Self {
        Self {
            cache_id,
            version,
            partitions,
            key_affinity_fields: HashMap::new(),
        }
    }

    /// Declares that keys of `type_id` route by the field `field_id`.
    pub fn with_key_affinity_field(mut self, type_id: i32, field_id: i32) -> Self {
        self.key_affinity_fields.insert(type_id, field_id);
        self
    }

    /// Returns the cache this map belongs to.
    pub fn cache_id(&self) -> i32 {
        self.cache_id
    }

    /// Returns the topology version the map was taken at.
    pub fn version(&self) -> AffinityVersion {
        self.version
    }

    /// Returns the number of partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Returns the candidate nodes of `partition`, primary first.
    pub fn nodes(&self, partition: usize) -> &[Uuid] {
        self.partitions.get(partition).map_or(&[], Vec::as_slice)
    }

    /// Returns the primary node of `partition`.
    pub fn primary(&self, partition: usize) -> Option<Uuid> {
        self.nodes(partition).first().copied()
    }

    /// Returns the affinity field the server configured for keys of `type_id`.
    pub fn key_affinity_field(&self, type_id: i32) -> Option<i32> {
        self.key_affinity_fields.get(&type_id).copied()
    }
}

/// Affinity state of a cache inside a snapshot.
#[derive(Debug, Clone)]
pub enum CacheAffinity {
    /// The cache's partitions are mapped to nodes.
    Mapped(Arc<PartitionMap>),
    /// The server does not support affinity routing for this cache.
    Unmapped,
}

/// Consistent view of partition ownership across caches.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    version: AffinityVersion,
    caches: HashMap<i32, CacheAffinity>,
}

impl TopologySnapshot {
    /// Returns the topology version of this snapshot.
    pub fn version(&self) -> AffinityVersion {
        self.version
    }

    /// Returns the affinity state of `cache_id`, if it was requested.
    pub fn cache(&self, cache_id: i32) -> Option<&CacheAffinity> {
        self.caches.get(&cache_id)
    }

    /// Returns the partition map of `cache_id`, if it is mapped.
    pub fn partition_map(&self, cache_id: i32) -> Option<&Arc<PartitionMap>> {
        match self.caches.get(&cache_id) {
            Some(CacheAffinity::Mapped(map)) => Some(map),
            _ => None,
        }
    }

    fn covers(&self, cache_id: i32, version: AffinityVersion) -> bool {
        self.version >= version && self.caches.contains_key(&cache_id)
    }
}

/// Where a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityTarget {
    /// Partition index of the key.
    pub partition: usize,
    /// Primary node of that partition.
    pub node: Uuid,
}

impl fmt::Display for AffinityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Partition[id={}, owner={}]", self.partition, self.node)
    }
}

/// Known endpoint of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Address the client reached the node at.
    pub address: SocketAddr,
    /// False after a connection failure, until a reconnect succeeds.
    pub reachable: bool,
}

/// Tracks partition ownership and routes keys to their primary node.
///
/// Responses report the latest affinity version through
/// [`observe`](Self::observe); the next affinity lookup then refreshes the
/// partition map. Concurrent refreshes collapse into one request.
#[derive(Debug)]
pub struct TopologyTracker {
    snapshot: RwLock<Arc<TopologySnapshot>>,
    observed: Mutex<AffinityVersion>,
    nodes: RwLock<HashMap<Uuid, NodeInfo>>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_count: AtomicU64,
    hasher: Arc<dyn AffinityHasher>,
    order: ByteOrder,
}

impl TopologyTracker {
    /// Creates a tracker hashing with the server-compatible hasher.
    pub fn new(order: ByteOrder) -> Self {
        Self::with_hasher(order, Arc::new(JavaHasher))
    }

    /// Creates a tracker with a custom hash implementation.
    pub fn with_hasher(order: ByteOrder, hasher: Arc<dyn AffinityHasher>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(TopologySnapshot::default())),
            observed: Mutex::new(AffinityVersion::default()),
            nodes: RwLock::new(HashMap::new()),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_count: AtomicU64::new(0),
            hasher,
            order,
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Returns the newest affinity version reported by any response.
    pub fn observed_version(&self) -> AffinityVersion {
        *self.observed.lock()
    }

    /// Returns how many partition requests have been issued.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    /// Records a version carried by a response.
    ///
    /// Returns true if it is newer than the current snapshot.
    pub fn observe(&self, version: AffinityVersion) -> bool {
        let mut observed = self.observed.lock();
        if version > *observed {
            tracing::debug!(from = %*observed, to = %version, "affinity version changed");
            *observed = version;
        }
        version > self.snapshot.read().version
    }

    /// Records that `node` is served at `address`.
    pub fn node_reachable(&self, node: Uuid, address: SocketAddr) {
        self.nodes.write().insert(
            node,
            NodeInfo {
                address,
                reachable: true,
            },
        );
    }

    /// Marks `node` unreachable after a connection failure.
    pub fn node_unreachable(&self, node: Uuid) {
        if let Some(info) = self.nodes.write().get_mut(&node) {
            info.reachable = false;
        }
    }

    /// Returns the known endpoint of `node`.
    pub fn node(&self, node: Uuid) -> Option<NodeInfo> {
        self.nodes.read().get(&node).copied()
    }

    /// Returns a snapshot covering `cache_id` at the latest observed version.
    ///
    /// When the current snapshot is stale, `fetch` is called with a
    /// partitions request. Only one caller fetches at a time; callers that
    /// waited behind it reuse its result.
    #[instrument(name = "topology.ensure_fresh", skip(self, fetch))]
    pub async fn ensure_fresh<F, Fut>(&self, cache_id: i32, fetch: F) -> Result<Arc<TopologySnapshot>>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let snapshot = self.snapshot();
        if snapshot.covers(cache_id, self.observed_version()) {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        let target = self.observed_version();
        let current = self.snapshot();
        if current.covers(cache_id, target) {
            return Ok(current);
        }

        let mut cache_ids: Vec<i32> = if current.version >= target {
            current.caches.keys().copied().collect()
        } else {
            Vec::new()
        };
        cache_ids.push(cache_id);
        cache_ids.sort_unstable();
        cache_ids.dedup();

        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(caches = cache_ids.len(), version = %target, "requesting partition map");
        let response = fetch(self.partitions_request(&cache_ids)?).await?.into_result()?;
        let mut fresh = decode_partitions(&response, &cache_ids)?;
        fresh.version = fresh.version.max(target);
        if fresh.version == current.version {
            for (id, affinity) in current.caches.iter() {
                fresh.caches.entry(*id).or_insert_with(|| affinity.clone());
            }
        }
        {
            let mut observed = self.observed.lock();
            if fresh.version > *observed {
                *observed = fresh.version;
            }
        }

        let fresh = Arc::new(fresh);
        *self.snapshot.write() = Arc::clone(&fresh);
        tracing::info!(version = %fresh.version, caches = fresh.caches.len(), "partition map refreshed");
        Ok(fresh)
    }

    fn partitions_request(&self, cache_ids: &[i32]) -> Result<Request> {
        let mut request = Request::new(OP_CACHE_PARTITIONS, self.order);
        let count = i32::try_from(cache_ids.len())
            .map_err(|_| IgniteError::Usage("too many caches in one request".to_string()))?;
        request.writer().write_int(count)?;
        for id in cache_ids {
            request.writer().write_int(*id)?;
        }
        Ok(request)
    }

    /// Locates `key` of `cache` in `snapshot`.
    ///
    /// Returns `None` when the cache is not mapped. The result depends only
    /// on the arguments.
    pub fn affinity(
        &self,
        snapshot: &TopologySnapshot,
        cache: &CacheDescriptor,
        key: &WireValue,
    ) -> Result<Option<AffinityTarget>> {
        let Some(map) = snapshot.partition_map(cache.cache_id()) else {
            return Ok(None);
        };
        let Some(partition) = self.partition_of(map, cache, key)? else {
            return Ok(None);
        };
        Ok(map.primary(partition).map(|node| AffinityTarget { partition, node }))
    }

    /// Computes the partition of `key` under `map`.
    pub fn partition_of(
        &self,
        map: &PartitionMap,
        cache: &CacheDescriptor,
        key: &WireValue,
    ) -> Result<Option<usize>> {
        if map.partition_count() == 0 {
            return Ok(None);
        }
        let hash = match affinity_key(map, cache, key)? {
            Some(field) => self.hasher.hash_code(&field)?,
            None => self.hasher.hash_code(key)?,
        };
        partition_for_hash(hash, map.partition_count()).map(Some)
    }
}

fn affinity_key(
    map: &PartitionMap,
    cache: &CacheDescriptor,
    key: &WireValue,
) -> Result<Option<WireValue>> {
    let WireValue::Complex(object) = key else {
        return Ok(None);
    };
    let field_id = cache
        .affinity_key_field_id()
        .or_else(|| map.key_affinity_field(object.type_id()));
    match field_id {
        Some(id) => object.field(id),
        None => Ok(None),
    }
}

fn decode_partitions(response: &Response, requested: &[i32]) -> Result<TopologySnapshot> {
    let mut input = response.reader();
    let version = AffinityVersion::new(input.read_long()?, input.read_int()?);
    let groups = input.read_len()?;
    let mut caches = HashMap::new();

    for _ in 0..groups {
        let applicable = input.read_bool()?;
        let cache_count = input.read_len()?;
        let mut group = Vec::with_capacity(cache_count.min(input.remaining()));
        for _ in 0..cache_count {
            let cache_id = input.read_int()?;
            let mut key_fields = Vec::new();
            if applicable {
                for _ in 0..input.read_len()? {
                    key_fields.push((input.read_int()?, input.read_int()?));
                }
            }
            group.push((cache_id, key_fields));
        }

        if !applicable {
            for (cache_id, _) in group {
                caches.insert(cache_id, CacheAffinity::Unmapped);
            }
            continue;
        }

        let mut partitions: Vec<Vec<Uuid>> = Vec::new();
        for _ in 0..input.read_len()? {
            let node = match WireValue::read_from(&mut input)? {
                WireValue::Uuid(node) => node,
                other => {
                    return Err(IgniteError::Protocol(format!(
                        "partition owner has type {:?}",
                        other.type_code()
                    )))
                }
            };
            for _ in 0..input.read_len()? {
                let index = input.read_int()?;
                let partition = usize::try_from(index)
                    .ok()
                    .filter(|p| *p < MAX_PARTITION_COUNT)
                    .ok_or_else(|| {
                        IgniteError::Protocol(format!(
                            "partition index {} outside 0..{}",
                            index, MAX_PARTITION_COUNT
                        ))
                    })?;
                if partition >= partitions.len() {
                    partitions.resize(partition + 1, Vec::new());
                }
                partitions[partition].push(node);
            }
        }

        for (cache_id, key_fields) in group {
            let map = key_fields.into_iter().fold(
                PartitionMap::new(cache_id, version, partitions.clone()),
                |map, (type_id, field_id)| map.with_key_affinity_field(type_id, field_id),
            );
            caches.insert(cache_id, CacheAffinity::Mapped(Arc::new(map)));
        }
    }

    for cache_id in requested {
        caches.entry(*cache_id).or_insert(CacheAffinity::Unmapped);
    }
    Ok(TopologySnapshot { version, caches })
}
