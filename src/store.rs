//! Ordered key-value store contracts and the in-memory backend
//!
//! The durable engine itself lives outside this crate; these traits capture
//! exactly what the label indices need from it: point reads/writes, batched
//! atomic writes, and ascending inclusive range scans, all scoped to a
//! dataset version. `MemoryKvStore` backs tests and single-process use
//! (implement `OrderedKvStore` against your storage engine for anything
//! durable).

use crate::error::{LabelvolError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Binds store operations to one version of one dataset by prefixing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionedContext {
    pub dataset: Uuid,
    pub version: Uuid,
}

impl VersionedContext {
    pub fn new(dataset: Uuid, version: Uuid) -> Self {
        Self { dataset, version }
    }

    /// Full store key for a context-relative key.
    pub fn wrap(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(32 + key.len());
        full.extend_from_slice(self.dataset.as_bytes());
        full.extend_from_slice(self.version.as_bytes());
        full.extend_from_slice(key);
        full
    }

    /// Strip this context's prefix, returning the relative key.
    pub fn strip<'a>(&self, full: &'a [u8]) -> Option<&'a [u8]> {
        let prefix_len = 32;
        if full.len() < prefix_len
            || &full[..16] != self.dataset.as_bytes()
            || &full[16..32] != self.version.as_bytes()
        {
            return None;
        }
        Some(&full[prefix_len..])
    }
}

/// One key-value pair delivered by a range scan, key already
/// context-relative.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub key: Bytes,
    pub value: Bytes,
}

/// Stream of scan results.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Chunk> + Send>>;

/// Batched writes committed atomically. A batch has exactly one owner; it is
/// never shared across concurrent writers.
#[async_trait]
pub trait WriteBatch: Send {
    /// Buffer a put. Nothing is visible until `commit`.
    fn put(&mut self, key: &[u8], value: Bytes);

    /// Number of buffered puts.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically apply all buffered puts, draining the batch.
    async fn commit(&mut self) -> Result<()>;
}

/// Ordered key-value store scoped by versioned contexts.
///
/// Range bounds are inclusive on both ends and expressed as context-relative
/// keys.
#[async_trait]
pub trait OrderedKvStore: Send + Sync {
    async fn get(&self, ctx: &VersionedContext, key: &[u8]) -> Result<Option<Bytes>>;

    async fn put(&self, ctx: &VersionedContext, key: &[u8], value: Bytes) -> Result<()>;

    async fn delete(&self, ctx: &VersionedContext, key: &[u8]) -> Result<()>;

    /// All keys in `[first, last]`, ascending.
    async fn keys_in_range(
        &self,
        ctx: &VersionedContext,
        first: &[u8],
        last: &[u8],
    ) -> Result<Vec<Bytes>>;

    /// Invoke `f` once per entry in `[first, last]`, in ascending key order.
    async fn process_range(
        &self,
        ctx: &VersionedContext,
        first: &[u8],
        last: &[u8],
        f: &mut (dyn FnMut(Chunk) + Send),
    ) -> Result<()>;

    /// Stream the entries in `[first, last]` in ascending key order.
    async fn scan_range(
        &self,
        ctx: &VersionedContext,
        first: &[u8],
        last: &[u8],
    ) -> Result<ChunkStream>;

    /// Open a new write batch against this store.
    fn new_batch(&self, ctx: &VersionedContext) -> Box<dyn WriteBatch>;
}

/// In-memory ordered store over a `BTreeMap`.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entry count across all contexts.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn collect_range(
        &self,
        ctx: &VersionedContext,
        first: &[u8],
        last: &[u8],
    ) -> Vec<(Bytes, Bytes)> {
        let lo = ctx.wrap(first);
        let hi = ctx.wrap(last);
        if lo > hi {
            return Vec::new();
        }
        let map = self.inner.read();
        map.range(lo..=hi)
            .filter_map(|(k, v)| {
                ctx.strip(k)
                    .map(|rel| (Bytes::copy_from_slice(rel), v.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl OrderedKvStore for MemoryKvStore {
    async fn get(&self, ctx: &VersionedContext, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.inner.read().get(&ctx.wrap(key)).cloned())
    }

    async fn put(&self, ctx: &VersionedContext, key: &[u8], value: Bytes) -> Result<()> {
        self.inner.write().insert(ctx.wrap(key), value);
        Ok(())
    }

    async fn delete(&self, ctx: &VersionedContext, key: &[u8]) -> Result<()> {
        self.inner.write().remove(&ctx.wrap(key));
        Ok(())
    }

    async fn keys_in_range(
        &self,
        ctx: &VersionedContext,
        first: &[u8],
        last: &[u8],
    ) -> Result<Vec<Bytes>> {
        Ok(self
            .collect_range(ctx, first, last)
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    async fn process_range(
        &self,
        ctx: &VersionedContext,
        first: &[u8],
        last: &[u8],
        f: &mut (dyn FnMut(Chunk) + Send),
    ) -> Result<()> {
        for (key, value) in self.collect_range(ctx, first, last) {
            f(Chunk { key, value });
        }
        Ok(())
    }

    async fn scan_range(
        &self,
        ctx: &VersionedContext,
        first: &[u8],
        last: &[u8],
    ) -> Result<ChunkStream> {
        let chunks: Vec<Chunk> = self
            .collect_range(ctx, first, last)
            .into_iter()
            .map(|(key, value)| Chunk { key, value })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn new_batch(&self, ctx: &VersionedContext) -> Box<dyn WriteBatch> {
        Box::new(MemoryBatch {
            inner: Arc::clone(&self.inner),
            ctx: *ctx,
            puts: Vec::new(),
        })
    }
}

struct MemoryBatch {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    ctx: VersionedContext,
    puts: Vec<(Vec<u8>, Bytes)>,
}

#[async_trait]
impl WriteBatch for MemoryBatch {
    fn put(&mut self, key: &[u8], value: Bytes) {
        self.puts.push((self.ctx.wrap(key), value));
    }

    fn len(&self) -> usize {
        self.puts.len()
    }

    async fn commit(&mut self) -> Result<()> {
        let mut map = self.inner.write();
        for (key, value) in self.puts.drain(..) {
            map.insert(key, value);
        }
        Ok(())
    }
}

/// Store roles the label indices draw from: a small-data store for the
/// spatial and size indices, a big-data store for surface blobs. Both may be
/// the same engine. Requesting an unconfigured role yields
/// `BackingStoreUnavailable`.
#[derive(Clone, Default)]
pub struct StoreRoles {
    small_data: Option<Arc<dyn OrderedKvStore>>,
    big_data: Option<Arc<dyn OrderedKvStore>>,
}

impl StoreRoles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both roles backed by one shared in-memory store.
    pub fn in_memory() -> Self {
        let store: Arc<dyn OrderedKvStore> = Arc::new(MemoryKvStore::new());
        Self {
            small_data: Some(Arc::clone(&store)),
            big_data: Some(store),
        }
    }

    pub fn with_small_data(mut self, store: Arc<dyn OrderedKvStore>) -> Self {
        self.small_data = Some(store);
        self
    }

    pub fn with_big_data(mut self, store: Arc<dyn OrderedKvStore>) -> Self {
        self.big_data = Some(store);
        self
    }

    pub fn small_data(&self) -> Result<Arc<dyn OrderedKvStore>> {
        self.small_data
            .clone()
            .ok_or(LabelvolError::BackingStoreUnavailable("small data"))
    }

    pub fn big_data(&self) -> Result<Arc<dyn OrderedKvStore>> {
        self.big_data
            .clone()
            .ok_or(LabelvolError::BackingStoreUnavailable("big data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn test_ctx() -> VersionedContext {
        VersionedContext::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_get_put_delete() {
        let store = MemoryKvStore::new();
        let ctx = test_ctx();

        assert!(store.get(&ctx, b"k").await.unwrap().is_none());
        store.put(&ctx, b"k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(
            store.get(&ctx, b"k").await.unwrap().unwrap(),
            Bytes::from_static(b"v")
        );
        store.delete(&ctx, b"k").await.unwrap();
        assert!(store.get(&ctx, b"k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let store = MemoryKvStore::new();
        let a = test_ctx();
        let b = test_ctx();
        store.put(&a, b"k", Bytes::from_static(b"v")).await.unwrap();
        assert!(store.get(&b, b"k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_scan_is_ordered_and_inclusive() {
        let store = MemoryKvStore::new();
        let ctx = test_ctx();
        for key in [b"c", b"a", b"e", b"b", b"d"] {
            store
                .put(&ctx, key.as_slice(), Bytes::copy_from_slice(key))
                .await
                .unwrap();
        }

        let keys = store.keys_in_range(&ctx, b"b", b"d").await.unwrap();
        assert_eq!(keys, vec![&b"b"[..], &b"c"[..], &b"d"[..]]);

        let mut seen = Vec::new();
        store
            .process_range(&ctx, b"b", b"d", &mut |chunk| seen.push(chunk.key))
            .await
            .unwrap();
        assert_eq!(seen, keys);

        let stream = store.scan_range(&ctx, b"b", b"d").await.unwrap();
        let streamed: Vec<_> = stream.map(|c| c.key).collect().await;
        assert_eq!(streamed, keys);
    }

    #[tokio::test]
    async fn test_empty_range_is_empty_not_error() {
        let store = MemoryKvStore::new();
        let ctx = test_ctx();
        assert!(store.keys_in_range(&ctx, b"x", b"z").await.unwrap().is_empty());
        // Inverted bounds behave as an empty range too.
        assert!(store.keys_in_range(&ctx, b"z", b"a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_invisible_until_commit() {
        let store = MemoryKvStore::new();
        let ctx = test_ctx();
        let mut batch = store.new_batch(&ctx);
        batch.put(b"k1", Bytes::from_static(b"v1"));
        batch.put(b"k2", Bytes::from_static(b"v2"));
        assert_eq!(batch.len(), 2);
        assert!(store.get(&ctx, b"k1").await.unwrap().is_none());

        batch.commit().await.unwrap();
        assert!(batch.is_empty());
        assert!(store.get(&ctx, b"k1").await.unwrap().is_some());
        assert!(store.get(&ctx, b"k2").await.unwrap().is_some());
    }

    #[test]
    fn test_unconfigured_role_is_unavailable() {
        let roles = StoreRoles::new();
        assert!(matches!(
            roles.small_data(),
            Err(LabelvolError::BackingStoreUnavailable("small data"))
        ));
        assert!(matches!(
            roles.big_data(),
            Err(LabelvolError::BackingStoreUnavailable("big data"))
        ));
    }
}
