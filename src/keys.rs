//! Store key layouts for the label indices
//!
//! All keys start with a one-byte namespace tag followed by big-endian
//! numeric fields, so the store's lexicographic key order matches the
//! numeric order a range scan needs:
//!
//! - spatial index: `tag(1) | label(8) | block coord(12)`
//! - size index:    `tag(1) | voxel count(8) | label(8)`
//! - surface blob:  `tag(1) | label(8)`

use crate::error::{LabelvolError, Result};
use serde::{Deserialize, Serialize};

/// Namespace tags for the key spaces this crate owns or reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyTag {
    /// (label, block) -> RLE runs, written by the block-labeling pipeline.
    LabelSpatialMap = 2,
    /// (voxel count, label) -> empty marker.
    LabelSizes = 3,
    /// label -> compressed surface blob.
    LabelSurface = 4,
}

/// Block coordinate in the volume's block grid.
///
/// Fields are declared in ZYX order so the derived `Ord` agrees with the
/// encoded byte order used by range scans.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockCoord {
    pub z: i32,
    pub y: i32,
    pub x: i32,
}

impl BlockCoord {
    /// Smallest possible block coordinate, the lower bound of full scans.
    pub const MIN: BlockCoord = BlockCoord {
        z: i32::MIN,
        y: i32::MIN,
        x: i32::MIN,
    };

    /// Largest possible block coordinate, the upper bound of full scans.
    pub const MAX: BlockCoord = BlockCoord {
        z: i32::MAX,
        y: i32::MAX,
        x: i32::MAX,
    };

    pub const ENCODED_LEN: usize = 12;

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { z, y, x }
    }

    /// Encode as ZYX big-endian with the sign bit flipped, so lexicographic
    /// byte order equals numeric order even for negative coordinates.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&order_preserving(self.z).to_be_bytes());
        out[4..8].copy_from_slice(&order_preserving(self.y).to_be_bytes());
        out[8..12].copy_from_slice(&order_preserving(self.x).to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(LabelvolError::Decode(format!(
                "block coordinate needs {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }
        let word = |off: usize| {
            u32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        Ok(Self {
            z: from_order_preserving(word(0)),
            y: from_order_preserving(word(4)),
            x: from_order_preserving(word(8)),
        })
    }
}

fn order_preserving(v: i32) -> u32 {
    (v as u32) ^ 0x8000_0000
}

fn from_order_preserving(v: u32) -> i32 {
    (v ^ 0x8000_0000) as i32
}

/// Key of one spatial index entry: `tag | label | block`.
pub fn spatial_index_key(label: u64, block: BlockCoord) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + BlockCoord::ENCODED_LEN);
    key.push(KeyTag::LabelSpatialMap as u8);
    key.extend_from_slice(&label.to_be_bytes());
    key.extend_from_slice(&block.encode());
    key
}

/// First and last spatial index keys for one label, bounding a full-label scan.
pub fn spatial_index_range(label: u64) -> (Vec<u8>, Vec<u8>) {
    (
        spatial_index_key(label, BlockCoord::MIN),
        spatial_index_key(label, BlockCoord::MAX),
    )
}

/// First and last spatial index keys over all labels.
pub fn spatial_index_full_range() -> (Vec<u8>, Vec<u8>) {
    (
        spatial_index_key(0, BlockCoord::MIN),
        spatial_index_key(u64::MAX, BlockCoord::MAX),
    )
}

/// Split a spatial index key back into (label, block coordinate).
pub fn parse_spatial_index_key(key: &[u8]) -> Result<(u64, BlockCoord)> {
    if key.len() != 1 + 8 + BlockCoord::ENCODED_LEN || key[0] != KeyTag::LabelSpatialMap as u8 {
        return Err(LabelvolError::Decode(format!(
            "malformed spatial index key of {} bytes",
            key.len()
        )));
    }
    let label = u64::from_be_bytes(key[1..9].try_into().unwrap());
    let block = BlockCoord::decode(&key[9..])?;
    Ok((label, block))
}

/// Key of one size index entry: `tag | voxel count | label`.
pub fn size_index_key(voxels: u64, label: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 8);
    key.push(KeyTag::LabelSizes as u8);
    key.extend_from_slice(&voxels.to_be_bytes());
    key.extend_from_slice(&label.to_be_bytes());
    key
}

/// Extract the label from a size index key.
///
/// A malformed key means the size index itself is corrupt, so this is a
/// structural `Decode` error rather than a not-found.
pub fn label_from_size_key(key: &[u8]) -> Result<u64> {
    if key.len() != 1 + 8 + 8 || key[0] != KeyTag::LabelSizes as u8 {
        return Err(LabelvolError::Decode(format!(
            "malformed size index key of {} bytes",
            key.len()
        )));
    }
    Ok(u64::from_be_bytes(key[9..17].try_into().unwrap()))
}

/// Key of one surface blob: `tag | label`.
pub fn surface_key(label: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.push(KeyTag::LabelSurface as u8);
    key.extend_from_slice(&label.to_be_bytes());
    key
}
