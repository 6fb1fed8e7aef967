//! Size index: per-label voxel counts and range queries
//!
//! The size computer sums run-length stats per contiguous label group and
//! appends one `(voxel count, label)` entry per group to the size index,
//! in write batches of up to [`SIZE_BATCH_THRESHOLD`] puts. Batching is
//! purely for write throughput; it grants no cross-batch atomicity, and a
//! failed intermediate commit loses just that batch's entries (repair is
//! re-running size computation).

use crate::error::{LabelvolError, Result};
use crate::keys::{label_from_size_key, size_index_key};
use crate::pipeline::{LabelChunk, LabelConsumer};
use crate::rle::{RleSet, SPATIAL_DIMS};
use crate::store::{OrderedKvStore, StoreRoles, VersionedContext, WriteBatch};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Buffered puts per size-index write batch.
pub const SIZE_BATCH_THRESHOLD: usize = 10_000;

/// Pipeline consumer that writes one size index entry per label group.
pub struct SizeComputer {
    store: Arc<dyn OrderedKvStore>,
    ctx: VersionedContext,
    batch: Box<dyn WriteBatch>,
    puts_in_batch: usize,
    intermediate_commits: usize,
    label: u64,
    voxels: u64,
}

impl SizeComputer {
    /// The size index lives in the small-data store role.
    pub fn new(stores: &StoreRoles, ctx: VersionedContext) -> Result<Self> {
        let store = stores.small_data()?;
        let batch = store.new_batch(&ctx);
        Ok(Self {
            store,
            ctx,
            batch,
            puts_in_batch: 0,
            intermediate_commits: 0,
            label: 0,
            voxels: 0,
        })
    }

    /// Intermediate (threshold-triggered) commits so far, not counting the
    /// final flush.
    pub fn intermediate_commits(&self) -> usize {
        self.intermediate_commits
    }
}

#[async_trait]
impl LabelConsumer for SizeComputer {
    fn begin(&mut self, label: u64) {
        self.label = label;
        self.voxels = 0;
    }

    fn absorb(&mut self, chunk: &LabelChunk) -> Result<()> {
        let (voxels, _runs) = RleSet::decode(SPATIAL_DIMS, &chunk.body)?.stats();
        self.voxels += voxels;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.batch
            .put(&size_index_key(self.voxels, self.label), Bytes::new());
        self.puts_in_batch += 1;
        if self.puts_in_batch % SIZE_BATCH_THRESHOLD == 0 {
            // A lost batch is logged and accepted; later labels still
            // accumulate.
            if let Err(e) = self.batch.commit().await {
                tracing::warn!(error = %e, "size index batch commit failed; entries lost");
            } else {
                self.intermediate_commits += 1;
            }
            self.batch = self.store.new_batch(&self.ctx);
        }
        Ok(())
    }

    async fn end_of_stream(&mut self) -> Result<()> {
        self.batch
            .commit()
            .await
            .map_err(|e| LabelvolError::BatchCommit(format!("final size index flush: {e}")))
    }
}

/// Range reads over the size index.
pub struct SizeRangeQuery {
    store: Arc<dyn OrderedKvStore>,
    ctx: VersionedContext,
}

impl SizeRangeQuery {
    pub fn new(stores: &StoreRoles, ctx: VersionedContext) -> Result<Self> {
        Ok(Self {
            store: stores.small_data()?,
            ctx,
        })
    }

    /// Labels whose voxel count lies in `[min_size, max_size]`, ascending by
    /// (count, label). `max_size == 0` means unbounded above. No matches is
    /// an empty list, not an error; an undecodable key means the index is
    /// corrupt and surfaces as a `Decode` error.
    pub async fn labels_in_range(&self, min_size: u64, max_size: u64) -> Result<Vec<u64>> {
        let upper = if max_size == 0 { u64::MAX } else { max_size };
        let first = size_index_key(min_size, 0);
        let last = size_index_key(upper, u64::MAX);
        let keys = self.store.keys_in_range(&self.ctx, &first, &last).await?;
        keys.iter().map(|key| label_from_size_key(key)).collect()
    }

    /// JSON rendering of [`Self::labels_in_range`] for front-end callers.
    pub async fn labels_in_range_json(&self, min_size: u64, max_size: u64) -> Result<String> {
        let labels = self.labels_in_range(min_size, max_size).await?;
        Ok(serde_json::to_string(&labels)?)
    }
}
