//! Run-length encoding of per-label voxel sets
//!
//! A [`RleSet`] holds every voxel a label occupies within one block (or, once
//! accumulated, across all blocks) as maximal runs along the fast-varying
//! axis. The binary layout is fixed: per run, one little-endian `i32` per
//! coordinate axis followed by one little-endian `i32` length. The axis count
//! is constant within a set and is carried out of band (in the sparse-volume
//! header or implied by the spatial index, which is always 3D).

use crate::error::{LabelvolError, Result};

/// Axis count used by the spatial index.
pub const SPATIAL_DIMS: u8 = 3;

/// One maximal contiguous voxel span along the fast-varying axis.
///
/// `start` has one coordinate per axis, fast axis first. Within a
/// (label, block) pair, runs never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub start: Vec<i32>,
    pub length: i32,
}

impl Run {
    pub fn new(start: Vec<i32>, length: i32) -> Self {
        Self { start, length }
    }

    pub fn dims(&self) -> u8 {
        self.start.len() as u8
    }
}

/// Ordered set of runs for one label, all with the same axis count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RleSet {
    dims: u8,
    runs: Vec<Run>,
}

impl RleSet {
    /// Create an empty set with the given axis count.
    pub fn new(dims: u8) -> Self {
        Self {
            dims,
            runs: Vec::new(),
        }
    }

    /// Byte length of one encoded run record for the given axis count.
    pub fn record_size(dims: u8) -> usize {
        (dims as usize + 1) * 4
    }

    pub fn dims(&self) -> u8 {
        self.dims
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Append a run. The run's axis count must match the set's.
    pub fn push(&mut self, run: Run) -> Result<()> {
        if run.dims() != self.dims {
            return Err(LabelvolError::Decode(format!(
                "run has {} axes, set expects {}",
                run.dims(),
                self.dims
            )));
        }
        if run.length <= 0 {
            return Err(LabelvolError::Decode(format!(
                "run length must be positive, got {}",
                run.length
            )));
        }
        self.runs.push(run);
        Ok(())
    }

    /// Sort runs by position, slowest-varying axis first, so serialization
    /// is deterministic.
    pub fn sort(&mut self) {
        self.runs.sort_by(|a, b| {
            a.start
                .iter()
                .rev()
                .cmp(b.start.iter().rev())
                .then(a.length.cmp(&b.length))
        });
    }

    /// Total voxel count and run count, in linear time.
    pub fn stats(&self) -> (u64, u32) {
        let voxels = self.runs.iter().map(|r| r.length as u64).sum();
        (voxels, self.runs.len() as u32)
    }

    /// Serialize to the fixed binary layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.runs.len() * Self::record_size(self.dims));
        self.encode_into(&mut buf);
        buf
    }

    /// Serialize, appending to an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        for run in &self.runs {
            for coord in &run.start {
                buf.extend_from_slice(&coord.to_le_bytes());
            }
            buf.extend_from_slice(&run.length.to_le_bytes());
        }
    }

    /// Deserialize a buffer holding whole run records for the given axis count.
    ///
    /// Fails with `Decode` if the buffer length is not a multiple of the record
    /// size (trailing or missing bytes) or if a run length is non-positive.
    pub fn decode(dims: u8, bytes: &[u8]) -> Result<Self> {
        let mut set = Self::new(dims);
        set.extend_from_bytes(bytes)?;
        Ok(set)
    }

    /// Decode run records from `bytes` and append them to this set.
    pub fn extend_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let record = Self::record_size(self.dims);
        if bytes.len() % record != 0 {
            return Err(LabelvolError::Decode(format!(
                "buffer of {} bytes is not a multiple of the {}-byte record for {} axes",
                bytes.len(),
                record,
                self.dims
            )));
        }
        self.runs.reserve(bytes.len() / record);
        for rec in bytes.chunks_exact(record) {
            let mut start = Vec::with_capacity(self.dims as usize);
            for axis in 0..self.dims as usize {
                let off = axis * 4;
                start.push(i32::from_le_bytes([
                    rec[off],
                    rec[off + 1],
                    rec[off + 2],
                    rec[off + 3],
                ]));
            }
            let off = self.dims as usize * 4;
            let length =
                i32::from_le_bytes([rec[off], rec[off + 1], rec[off + 2], rec[off + 3]]);
            if length <= 0 {
                return Err(LabelvolError::Decode(format!(
                    "run at {:?} has non-positive length {}",
                    start, length
                )));
            }
            self.runs.push(Run::new(start, length));
        }
        Ok(())
    }
}
