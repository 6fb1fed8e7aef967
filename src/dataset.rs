//! Dataset descriptor: the geometry the consumers read from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical spacing of one voxel along each axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelResolution {
    /// Voxel extent along x, y, z.
    pub size: [f32; 3],
    /// Unit of measurement (e.g., "nanometers").
    pub units: String,
}

impl VoxelResolution {
    pub fn new(size: [f32; 3], units: impl Into<String>) -> Self {
        Self {
            size,
            units: units.into(),
        }
    }

    pub fn isotropic(size: f32, units: impl Into<String>) -> Self {
        Self::new([size, size, size], units)
    }
}

impl Default for VoxelResolution {
    fn default() -> Self {
        Self::isotropic(8.0, "nanometers")
    }
}

/// Descriptor for one label volume dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,

    pub name: String,

    /// Block extent along x, y, z.
    pub block_size: [i32; 3],

    /// Native voxel resolution.
    pub resolution: VoxelResolution,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            block_size: [32, 32, 32],
            resolution: VoxelResolution::default(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_block_size(mut self, block_size: [i32; 3]) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_resolution(mut self, resolution: VoxelResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Update the modification timestamp.
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_defaults() {
        let dataset = Dataset::new("segmentation");
        assert_eq!(dataset.block_size, [32, 32, 32]);
        assert_eq!(dataset.resolution.size, [8.0, 8.0, 8.0]);
    }

    #[test]
    fn test_dataset_json_round_trip() {
        let dataset = Dataset::new("segmentation")
            .with_block_size([64, 64, 64])
            .with_resolution(VoxelResolution::new([4.0, 4.0, 40.0], "nanometers"));
        let json = serde_json::to_string(&dataset).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, dataset.id);
        assert_eq!(back.block_size, [64, 64, 64]);
        assert_eq!(back.resolution, dataset.resolution);
    }
}
