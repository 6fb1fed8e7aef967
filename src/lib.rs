//! labelvol - label-indexed sparse volumes
//!
//! Core of a versioned volumetric store for large 3D label (segmentation)
//! volumes: per-label voxel sets are kept as run-length encoded spatial
//! index entries, streamed in label order through aggregation pipelines,
//! and summarized into secondary indices (voxel-count sizes) and derived
//! artifacts (compressed surface meshes, self-describing sparse-volume
//! blobs).
//!
//! # Features
//!
//! - Compact little-endian RLE codec for sparse 3D regions
//! - Ordered-streaming aggregation grouping contiguous same-label chunks
//! - Batched size-index writes with ascending (count, label) range queries
//! - Surface extraction (vertices + gradient normals) stored gzip-best
//! - Store contracts (ordered scans, batched writes, versioned contexts)
//!   with an in-memory backend; implement [`store::OrderedKvStore`] against
//!   your storage engine for durable deployments
//!
//! # Example
//!
//! ```rust,ignore
//! use labelvol::{SizeRangeQuery, StoreRoles, VersionedContext};
//!
//! # async fn example() -> labelvol::Result<()> {
//! let roles = StoreRoles::in_memory();
//! let ctx = VersionedContext::new(dataset_id, version_id);
//! let query = SizeRangeQuery::new(&roles, ctx)?;
//! let labels = query.labels_in_range(1_000, 0).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod dataset;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod pixels;
pub mod rle;
pub mod size;
pub mod sparsevol;
pub mod store;
pub mod surface;

// Re-exports
pub use codec::{Checksum, CompressionLevel, CompressionMethod, Compressor};
pub use dataset::{Dataset, VoxelResolution};
pub use error::{LabelvolError, Result};
pub use keys::{BlockCoord, KeyTag};
pub use pipeline::{LabelAggregationPipeline, LabelChunk, LabelConsumer, StreamMessage};
pub use rle::{RleSet, Run};
pub use size::{SizeComputer, SizeRangeQuery, SIZE_BATCH_THRESHOLD};
pub use sparsevol::{SparseVol, SparseVolumeEncoder, SpatialIndexWriter};
pub use store::{MemoryKvStore, OrderedKvStore, StoreRoles, VersionedContext, WriteBatch};
pub use surface::{extract_surface, get_surface, SurfaceComputer, SurfaceMesh};

/// Version of the labelvol implementation
pub const LABELVOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserved label meaning "no label"; always a grouping boundary.
pub const BACKGROUND_LABEL: u64 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!LABELVOL_VERSION.is_empty());
    }
}
