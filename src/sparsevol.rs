//! Sparse volumes: accumulation, spatial-index writes, wire encoding
//!
//! A sparse volume is the full 3D extent of one label's voxels, reassembled
//! from its spatial index entries. [`SparseVolumeEncoder`] serializes it to
//! a self-describing blob with this layout (multi-byte integers little
//! endian):
//!
//! ```text
//! byte    payload descriptor (bit flags: 0=8-bit grayscale, 1=16-bit
//!         grayscale, 2=16-bit normals; none set by default)
//! byte    number of axes (3)
//! byte    fast-varying run axis index (0 = x)
//! byte    reserved
//! u32     voxel count (placeholder, always 0)
//! u32     run count
//! repeated run records:
//!   i32 x 3   run start coordinate
//!   i32       run length
//!   [optional payload bytes per descriptor]
//! ```

use crate::error::{LabelvolError, Result};
use crate::keys::{spatial_index_key, spatial_index_range, BlockCoord};
use crate::rle::{RleSet, SPATIAL_DIMS};
use crate::store::{OrderedKvStore, VersionedContext};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Payload descriptor bit: run records carry 8-bit grayscale values.
pub const PAYLOAD_GRAY8: u8 = 1 << 0;
/// Payload descriptor bit: run records carry 16-bit grayscale values.
pub const PAYLOAD_GRAY16: u8 = 1 << 1;
/// Payload descriptor bit: run records carry 16-bit normals.
pub const PAYLOAD_NORMALS16: u8 = 1 << 2;

/// Byte length of the sparse-volume blob header.
pub const SPARSE_VOL_HEADER_LEN: usize = 12;

/// One label's accumulated voxels across blocks.
#[derive(Debug, Clone)]
pub struct SparseVol {
    label: u64,
    runs: RleSet,
    num_voxels: u64,
    bounds: Option<([i32; 3], [i32; 3])>,
}

impl Default for SparseVol {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseVol {
    pub fn new() -> Self {
        Self {
            label: 0,
            runs: RleSet::new(SPATIAL_DIMS),
            num_voxels: 0,
            bounds: None,
        }
    }

    /// Drop all accumulated runs, keeping the allocation's label at 0.
    pub fn clear(&mut self) {
        self.label = 0;
        self.runs = RleSet::new(SPATIAL_DIMS);
        self.num_voxels = 0;
        self.bounds = None;
    }

    pub fn set_label(&mut self, label: u64) {
        self.label = label;
    }

    pub fn label(&self) -> u64 {
        self.label
    }

    pub fn runs(&self) -> &RleSet {
        &self.runs
    }

    pub fn num_voxels(&self) -> u64 {
        self.num_voxels
    }

    /// Inclusive voxel-coordinate bounding box, if any runs are present.
    pub fn bounds(&self) -> Option<([i32; 3], [i32; 3])> {
        self.bounds
    }

    /// Merge one spatial index entry's raw run bytes into this volume.
    pub fn add_runs(&mut self, bytes: &[u8]) -> Result<()> {
        let decoded = RleSet::decode(SPATIAL_DIMS, bytes)?;
        for run in decoded.runs() {
            let start = [run.start[0], run.start[1], run.start[2]];
            // Widen before adding: a run ending at the top of the coordinate
            // range is wire-valid and must not wrap.
            let end_x = start[0] as i64 + run.length as i64 - 1;
            if end_x > i32::MAX as i64 {
                return Err(LabelvolError::Decode(format!(
                    "run at {:?} of length {} extends past the coordinate range",
                    run.start, run.length
                )));
            }
            let end = [end_x as i32, start[1], start[2]];
            self.bounds = Some(match self.bounds {
                None => (start, end),
                Some((mut lo, mut hi)) => {
                    for axis in 0..3 {
                        lo[axis] = lo[axis].min(start[axis]);
                        hi[axis] = hi[axis].max(end[axis]);
                    }
                    (lo, hi)
                }
            });
            self.num_voxels += run.length as u64;
            self.runs.push(run.clone())?;
        }
        Ok(())
    }
}

/// Persists the per-block label-to-runs map produced by the block-labeling
/// pipeline into the spatial index.
pub struct SpatialIndexWriter {
    store: Arc<dyn OrderedKvStore>,
    ctx: VersionedContext,
}

impl SpatialIndexWriter {
    pub fn new(store: Arc<dyn OrderedKvStore>, ctx: VersionedContext) -> Self {
        Self { store, ctx }
    }

    /// Write one spatial index entry per label with voxels in `block`, as a
    /// single committed batch. Runs are sorted into scan order before
    /// encoding, so stored entries are deterministic regardless of the order
    /// the block labeler emitted them. Empty run sets are skipped.
    pub async fn write_block(
        &self,
        block: BlockCoord,
        label_runs: &HashMap<u64, RleSet>,
    ) -> Result<()> {
        let mut batch = self.store.new_batch(&self.ctx);
        for (&label, runs) in label_runs {
            if runs.is_empty() {
                continue;
            }
            let mut ordered = runs.clone();
            ordered.sort();
            batch.put(&spatial_index_key(label, block), ordered.encode().into());
        }
        batch
            .commit()
            .await
            .map_err(|e| LabelvolError::BatchCommit(format!("spatial index block put: {e}")))
    }
}

/// Encodes a label's full sparse volume from an ordered spatial-index scan.
pub struct SparseVolumeEncoder {
    store: Arc<dyn OrderedKvStore>,
    ctx: VersionedContext,
}

impl SparseVolumeEncoder {
    pub fn new(store: Arc<dyn OrderedKvStore>, ctx: VersionedContext) -> Self {
        Self { store, ctx }
    }

    /// Encode one label's sparse volume.
    ///
    /// Run records are appended in ascending block-coordinate order, which is
    /// exactly the scan order of the spatial index; entries are never
    /// interleaved into the output buffer. The voxel-count header field stays
    /// at its placeholder zero for wire compatibility with existing
    /// consumers; the run count is patched in once the scan completes.
    pub async fn encode_label(&self, label: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SPARSE_VOL_HEADER_LEN);
        buf.push(0u8); // payload descriptor, no auxiliary payloads
        buf.push(SPATIAL_DIMS);
        buf.push(0u8); // runs vary fastest along x
        buf.push(0u8); // reserved
        buf.extend_from_slice(&0u32.to_le_bytes()); // voxel count placeholder
        buf.extend_from_slice(&0u32.to_le_bytes()); // run count, patched below

        let record = RleSet::record_size(SPATIAL_DIMS);
        let mut num_blocks = 0u32;
        let mut num_runs = 0u32;
        let mut malformed: Option<usize> = None;

        let (first, last) = spatial_index_range(label);
        self.store
            .process_range(&self.ctx, &first, &last, &mut |chunk| {
                if chunk.value.len() % record != 0 {
                    malformed.get_or_insert(chunk.value.len());
                    return;
                }
                num_blocks += 1;
                num_runs += (chunk.value.len() / record) as u32;
                buf.extend_from_slice(&chunk.value);
            })
            .await?;

        if let Some(len) = malformed {
            return Err(LabelvolError::Decode(format!(
                "spatial index entry for label {label} holds {len} bytes, \
                 not whole {record}-byte run records"
            )));
        }

        buf[8..12].copy_from_slice(&num_runs.to_le_bytes());
        tracing::debug!(label, blocks = num_blocks, runs = num_runs, "encoded sparse volume");
        Ok(buf)
    }

    /// Encode several labels concurrently; results come back in input order.
    pub async fn encode_labels(&self, labels: &[u64]) -> Result<Vec<Vec<u8>>> {
        try_join_all(labels.iter().map(|&label| self.encode_label(label))).await
    }
}
