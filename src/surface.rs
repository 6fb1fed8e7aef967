//! Surface computation and storage
//!
//! A pipeline consumer accumulates one label's full sparse volume, extracts
//! a surface (one vertex per boundary voxel, with a gradient-estimated unit
//! normal), and stores the result as a gzip-compressed blob:
//!
//! ```text
//! u32        surface voxel count N (little-endian)
//! f32 x 3N   vertex positions, scaled by the native voxel resolution
//! f32 x 3N   unit normals
//! ```
//!
//! Gzip at best compression trades time at the single write for speed over
//! many interactive reads.

use crate::codec::{deserialize_data, serialize_data, Checksum, CompressionLevel, CompressionMethod};
use crate::dataset::{Dataset, VoxelResolution};
use crate::error::{LabelvolError, Result};
use crate::keys::surface_key;
use crate::pipeline::{LabelAggregationPipeline, LabelChunk, LabelConsumer, StreamMessage};
use crate::sparsevol::SparseVol;
use crate::store::{OrderedKvStore, StoreRoles, VersionedContext};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;

/// Rasterization cap for one label's bounding box, in voxels.
const MAX_RASTER_VOXELS: usize = 1 << 31;

/// Extracted surface: one vertex and one unit normal per boundary voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMesh {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
}

impl SurfaceMesh {
    pub fn num_voxels(&self) -> u32 {
        self.vertices.len() as u32
    }

    /// Serialize to the uncompressed blob layout.
    pub fn encode(&self) -> Vec<u8> {
        let n = self.vertices.len();
        let mut buf = Vec::with_capacity(4 + n * 24);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
        for vertex in &self.vertices {
            for component in vertex {
                buf.extend_from_slice(&component.to_le_bytes());
            }
        }
        for normal in &self.normals {
            for component in normal {
                buf.extend_from_slice(&component.to_le_bytes());
            }
        }
        buf
    }

    /// Deserialize a blob produced by [`SurfaceMesh::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(LabelvolError::Decode(
                "surface blob shorter than its count field".to_string(),
            ));
        }
        let n = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() != 4 + n * 24 {
            return Err(LabelvolError::Decode(format!(
                "surface blob of {} bytes inconsistent with {} voxels",
                bytes.len(),
                n
            )));
        }
        let triple = |off: usize| {
            let mut out = [0f32; 3];
            for (i, item) in out.iter_mut().enumerate() {
                let at = off + i * 4;
                *item = f32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
            }
            out
        };
        let vertices = (0..n).map(|i| triple(4 + i * 12)).collect();
        let normals = (0..n).map(|i| triple(4 + n * 12 + i * 12)).collect();
        Ok(Self { vertices, normals })
    }
}

/// Dense occupancy raster of one label's bounding box.
struct Raster {
    occ: Vec<u8>,
    lo: [i32; 3],
    hi: [i32; 3],
    dims: [usize; 3],
}

impl Raster {
    fn from_vol(vol: &SparseVol) -> Result<Option<Self>> {
        let Some((lo, hi)) = vol.bounds() else {
            return Ok(None);
        };
        // Extents are computed in i64: a box spanning most of the coordinate
        // range must trip the size limit, not wrap.
        let mut dims = [0usize; 3];
        let mut total = 1i64;
        for axis in 0..3 {
            let extent = hi[axis] as i64 - lo[axis] as i64 + 1;
            total = total
                .checked_mul(extent)
                .filter(|&t| t <= MAX_RASTER_VOXELS as i64)
                .ok_or_else(|| {
                    LabelvolError::Decode(format!(
                        "surface bounding box from {lo:?} to {hi:?} exceeds the \
                         rasterization limit of {MAX_RASTER_VOXELS} voxels"
                    ))
                })?;
            dims[axis] = extent as usize;
        }

        let mut raster = Self {
            occ: vec![0u8; total as usize],
            lo,
            hi,
            dims,
        };
        for run in vol.runs().runs() {
            let y = run.start[1] as i64;
            let z = run.start[2] as i64;
            let start = run.start[0] as i64;
            for x in start..start + run.length as i64 {
                let idx = raster.index(x, y, z);
                raster.occ[idx] = 1;
            }
        }
        Ok(Some(raster))
    }

    fn index(&self, x: i64, y: i64, z: i64) -> usize {
        let ix = (x - self.lo[0] as i64) as usize;
        let iy = (y - self.lo[1] as i64) as usize;
        let iz = (z - self.lo[2] as i64) as usize;
        (iz * self.dims[1] + iy) * self.dims[0] + ix
    }

    /// Occupancy at a global voxel coordinate; outside the raster is empty.
    /// Coordinates are i64 so neighbor probes past the i32 range stay valid.
    fn occupied(&self, x: i64, y: i64, z: i64) -> bool {
        for (axis, &coord) in [x, y, z].iter().enumerate() {
            if coord < self.lo[axis] as i64 || coord > self.hi[axis] as i64 {
                return false;
            }
        }
        self.occ[self.index(x, y, z)] == 1
    }
}

/// Extract the surface of an accumulated sparse volume at the dataset's
/// native voxel resolution.
///
/// A voxel is on the surface when any of its six face neighbors is empty.
/// Its normal is the negated central-difference gradient of the occupancy
/// field, normalized; a zero gradient falls back to +y.
pub fn extract_surface(vol: &SparseVol, resolution: &VoxelResolution) -> Result<SurfaceMesh> {
    let Some(raster) = Raster::from_vol(vol)? else {
        return Ok(SurfaceMesh {
            vertices: Vec::new(),
            normals: Vec::new(),
        });
    };

    let mut vertices = Vec::new();
    let mut normals = Vec::new();
    let (lo, dims) = (raster.lo, raster.dims);
    for iz in 0..dims[2] as i64 {
        for iy in 0..dims[1] as i64 {
            for ix in 0..dims[0] as i64 {
                let (x, y, z) = (lo[0] as i64 + ix, lo[1] as i64 + iy, lo[2] as i64 + iz);
                if !raster.occupied(x, y, z) {
                    continue;
                }
                let neighbors = [
                    raster.occupied(x + 1, y, z),
                    raster.occupied(x - 1, y, z),
                    raster.occupied(x, y + 1, z),
                    raster.occupied(x, y - 1, z),
                    raster.occupied(x, y, z + 1),
                    raster.occupied(x, y, z - 1),
                ];
                if neighbors.iter().all(|&n| n) {
                    continue;
                }
                vertices.push([
                    (x as f32 + 0.5) * resolution.size[0],
                    (y as f32 + 0.5) * resolution.size[1],
                    (z as f32 + 0.5) * resolution.size[2],
                ]);
                normals.push(occupancy_normal(&neighbors));
            }
        }
    }
    Ok(SurfaceMesh { vertices, normals })
}

/// Outward normal from the six face-neighbor occupancies: the negated
/// central-difference gradient, normalized.
fn occupancy_normal(neighbors: &[bool; 6]) -> [f32; 3] {
    let sample = |occupied: bool| occupied as u8 as f32;
    let g = [
        sample(neighbors[0]) - sample(neighbors[1]),
        sample(neighbors[2]) - sample(neighbors[3]),
        sample(neighbors[4]) - sample(neighbors[5]),
    ];
    let len_sq = g[0] * g[0] + g[1] * g[1] + g[2] * g[2];
    if len_sq < 1e-8 {
        return [0.0, 1.0, 0.0];
    }
    let inv = -len_sq.sqrt().recip();
    [g[0] * inv, g[1] * inv, g[2] * inv]
}

/// Pipeline consumer that computes and stores one surface per label group.
pub struct SurfaceComputer {
    store: Arc<dyn OrderedKvStore>,
    ctx: VersionedContext,
    resolution: VoxelResolution,
    vol: SparseVol,
}

impl SurfaceComputer {
    /// Surfaces live in the big-data store role.
    pub fn new(stores: &StoreRoles, ctx: VersionedContext, dataset: &Dataset) -> Result<Self> {
        Ok(Self {
            store: stores.big_data()?,
            ctx,
            resolution: dataset.resolution.clone(),
            vol: SparseVol::new(),
        })
    }

    /// Drive this consumer on a spawned task, holding `permit` from the
    /// worker-admission pool until the run ends. The permit is released and
    /// the handle completes on every exit path, success or failure, so
    /// callers awaiting the batch never deadlock; a failed run can leave the
    /// surface index partially updated.
    pub fn spawn(
        self,
        rx: mpsc::Receiver<StreamMessage>,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let _permit = permit;
            match LabelAggregationPipeline::new(self).run(rx).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "surface computation aborted");
                    Err(e)
                }
            }
        })
    }

    async fn compute_and_save(&mut self) -> Result<()> {
        let label = self.vol.label();
        let mesh = extract_surface(&self.vol, &self.resolution)?;
        let blob = serialize_data(
            &mesh.encode(),
            CompressionMethod::Gzip,
            CompressionLevel::best(),
            Checksum::None,
        )?;
        self.store
            .put(&self.ctx, &surface_key(label), blob.into())
            .await?;
        tracing::debug!(label, vertices = mesh.vertices.len(), "stored surface");
        Ok(())
    }
}

#[async_trait]
impl LabelConsumer for SurfaceComputer {
    fn begin(&mut self, label: u64) {
        self.vol.clear();
        self.vol.set_label(label);
    }

    fn absorb(&mut self, chunk: &LabelChunk) -> Result<()> {
        self.vol.add_runs(&chunk.body)
    }

    async fn finalize(&mut self) -> Result<()> {
        self.compute_and_save().await
    }

    async fn end_of_stream(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fetch a label's stored surface blob, decompressed.
///
/// A label with no stored surface is a normal outcome and returns
/// `Ok(None)`, never an error.
pub async fn get_surface(
    stores: &StoreRoles,
    ctx: &VersionedContext,
    label: u64,
) -> Result<Option<Vec<u8>>> {
    let store = stores.big_data()?;
    match store.get(ctx, &surface_key(label)).await? {
        None => Ok(None),
        Some(blob) => Ok(Some(deserialize_data(&blob)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rle::{RleSet, Run, SPATIAL_DIMS};

    fn vol_of(spans: &[([i32; 3], i32)]) -> SparseVol {
        let mut set = RleSet::new(SPATIAL_DIMS);
        for (start, length) in spans {
            set.push(Run::new(start.to_vec(), *length)).unwrap();
        }
        let mut vol = SparseVol::new();
        vol.add_runs(&set.encode()).unwrap();
        vol
    }

    fn unit_resolution() -> VoxelResolution {
        VoxelResolution::isotropic(1.0, "voxels")
    }

    #[test]
    fn test_single_voxel_surface() {
        let mesh = extract_surface(&vol_of(&[([0, 0, 0], 1)]), &unit_resolution()).unwrap();
        assert_eq!(mesh.vertices, vec![[0.5, 0.5, 0.5]]);
        // Empty on both sides of every axis: zero gradient, +y fallback.
        assert_eq!(mesh.normals, vec![[0.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_solid_cube_interior_is_excluded() {
        let mut spans = Vec::new();
        for z in 0..3 {
            for y in 0..3 {
                spans.push(([0, y, z], 3));
            }
        }
        let mesh = extract_surface(&vol_of(&spans), &unit_resolution()).unwrap();
        // 27 voxels, only the center is interior.
        assert_eq!(mesh.vertices.len(), 26);
        assert!(!mesh.vertices.contains(&[1.5, 1.5, 1.5]));
    }

    #[test]
    fn test_run_end_normal_points_outward() {
        let mesh = extract_surface(&vol_of(&[([0, 0, 0], 3)]), &unit_resolution()).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        // Leftmost voxel: solid only on +x, so the normal points toward -x.
        let first = mesh.normals[0];
        assert!(first[0] < -0.99);
        // Rightmost voxel faces +x.
        let last = mesh.normals[2];
        assert!(last[0] > 0.99);
    }

    #[test]
    fn test_resolution_scales_vertices() {
        let res = VoxelResolution::new([4.0, 4.0, 40.0], "nanometers");
        let mesh = extract_surface(&vol_of(&[([1, 0, 2], 1)]), &res).unwrap();
        assert_eq!(mesh.vertices, vec![[6.0, 2.0, 100.0]]);
    }

    #[test]
    fn test_mesh_blob_round_trip() {
        let mesh = extract_surface(&vol_of(&[([0, 0, 0], 2)]), &unit_resolution()).unwrap();
        let decoded = SurfaceMesh::decode(&mesh.encode()).unwrap();
        assert_eq!(decoded, mesh);
    }

    #[test]
    fn test_truncated_mesh_blob_is_decode_error() {
        let mesh = extract_surface(&vol_of(&[([0, 0, 0], 2)]), &unit_resolution()).unwrap();
        let mut bytes = mesh.encode();
        bytes.pop();
        assert!(matches!(
            SurfaceMesh::decode(&bytes),
            Err(LabelvolError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_volume_yields_empty_mesh() {
        let mesh = extract_surface(&SparseVol::new(), &unit_resolution()).unwrap();
        assert!(mesh.vertices.is_empty());
        assert!(mesh.normals.is_empty());
    }

    #[test]
    fn test_voxel_at_coordinate_max_has_a_surface() {
        let top = i32::MAX;
        let mesh = extract_surface(&vol_of(&[([top, top, top], 1)]), &unit_resolution()).unwrap();
        assert_eq!(mesh.vertices.len(), 1);
        assert_eq!(mesh.normals, vec![[0.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_full_range_bounding_box_is_decode_error() {
        let vol = vol_of(&[([i32::MIN, 0, 0], 1), ([i32::MAX - 1, 0, 0], 1)]);
        assert!(matches!(
            extract_surface(&vol, &unit_resolution()),
            Err(LabelvolError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_surfaces_failure_and_releases_permit() {
        use crate::store::StoreRoles;
        use bytes::Bytes;
        use tokio::sync::Semaphore;
        use uuid::Uuid;

        let roles = StoreRoles::in_memory();
        let ctx = VersionedContext::new(Uuid::new_v4(), Uuid::new_v4());
        let dataset = Dataset::new("aborted-run");

        let admission = Arc::new(Semaphore::new(1));
        let permit = admission.clone().acquire_owned().await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamMessage::Chunk(LabelChunk {
            label: 3,
            body: Bytes::from_static(&[1, 2, 3]),
        }))
        .await
        .unwrap();
        drop(tx);

        let computer = SurfaceComputer::new(&roles, ctx, &dataset).unwrap();
        let result = computer.spawn(rx, permit).await.unwrap();
        assert!(matches!(result, Err(LabelvolError::Decode(_))));
        assert_eq!(admission.available_permits(), 1);
        assert!(get_surface(&roles, &ctx, 3).await.unwrap().is_none());
    }
}
