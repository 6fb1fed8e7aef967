//! End-to-end test: spatial index writes, streaming aggregation, size and
//! surface indices, sparse-volume encoding.

use labelvol::keys::surface_key;
use labelvol::pipeline::stream_spatial_index;
use labelvol::{
    get_surface, BlockCoord, Dataset, LabelAggregationPipeline, RleSet, Run, SizeComputer,
    SizeRangeQuery, SparseVolumeEncoder, SpatialIndexWriter, StoreRoles, SurfaceComputer,
    SurfaceMesh, VersionedContext,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

fn runs_of(spans: &[([i32; 3], i32)]) -> RleSet {
    let mut set = RleSet::new(3);
    for (start, length) in spans {
        set.push(Run::new(start.to_vec(), *length)).unwrap();
    }
    set
}

/// Populate two labels spanning two blocks each; returns voxel counts.
async fn populate(roles: &StoreRoles, ctx: VersionedContext) -> HashMap<u64, u64> {
    let writer = SpatialIndexWriter::new(roles.small_data().unwrap(), ctx);

    let mut block0 = HashMap::new();
    block0.insert(1u64, runs_of(&[([0, 0, 0], 3), ([0, 1, 0], 2)]));
    block0.insert(2u64, runs_of(&[([10, 10, 10], 4)]));
    writer
        .write_block(BlockCoord::new(0, 0, 0), &block0)
        .await
        .unwrap();

    let mut block1 = HashMap::new();
    block1.insert(1u64, runs_of(&[([32, 0, 0], 1)]));
    block1.insert(2u64, runs_of(&[([40, 10, 10], 5)]));
    writer
        .write_block(BlockCoord::new(1, 0, 0), &block1)
        .await
        .unwrap();

    HashMap::from([(1u64, 6u64), (2u64, 9u64)])
}

async fn run_size_pipeline(roles: &StoreRoles, ctx: VersionedContext) {
    let (tx, rx) = mpsc::channel(16);
    let store = roles.small_data().unwrap();
    let producer = tokio::spawn(async move { stream_spatial_index(store, ctx, tx).await });
    let computer = SizeComputer::new(roles, ctx).unwrap();
    LabelAggregationPipeline::new(computer).run(rx).await.unwrap();
    producer.await.unwrap().unwrap();
}

async fn run_surface_pipeline(roles: &StoreRoles, ctx: VersionedContext, dataset: &Dataset) {
    let admission = Arc::new(Semaphore::new(2));
    let (tx, rx) = mpsc::channel(16);
    let store = roles.small_data().unwrap();
    let producer = tokio::spawn(async move { stream_spatial_index(store, ctx, tx).await });

    let permit = admission.clone().acquire_owned().await.unwrap();
    let computer = SurfaceComputer::new(roles, ctx, dataset).unwrap();
    let handle = computer.spawn(rx, permit);

    handle.await.unwrap().unwrap();
    producer.await.unwrap().unwrap();
    assert_eq!(admission.available_permits(), 2);
}

#[tokio::test]
async fn test_sizes_end_to_end() {
    let roles = StoreRoles::in_memory();
    let ctx = VersionedContext::new(Uuid::new_v4(), Uuid::new_v4());
    let expected = populate(&roles, ctx).await;

    run_size_pipeline(&roles, ctx).await;

    let query = SizeRangeQuery::new(&roles, ctx).unwrap();
    assert_eq!(query.labels_in_range(1, 0).await.unwrap(), vec![1, 2]);
    assert_eq!(
        query.labels_in_range(expected[&2], expected[&2]).await.unwrap(),
        vec![2]
    );
    assert!(query.labels_in_range(100, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_surfaces_end_to_end() {
    let roles = StoreRoles::in_memory();
    let ctx = VersionedContext::new(Uuid::new_v4(), Uuid::new_v4());
    let dataset = Dataset::new("end-to-end");
    populate(&roles, ctx).await;

    run_surface_pipeline(&roles, ctx, &dataset).await;

    for label in [1u64, 2] {
        let blob = get_surface(&roles, &ctx, label).await.unwrap().unwrap();
        let mesh = SurfaceMesh::decode(&blob).unwrap();
        assert!(mesh.num_voxels() > 0);
        assert_eq!(mesh.vertices.len(), mesh.normals.len());
    }

    // A label that was never computed is a not-found, not an error.
    assert!(get_surface(&roles, &ctx, 999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_surface_recomputation_is_idempotent() {
    let roles = StoreRoles::in_memory();
    let ctx = VersionedContext::new(Uuid::new_v4(), Uuid::new_v4());
    let dataset = Dataset::new("idempotence");
    populate(&roles, ctx).await;

    run_surface_pipeline(&roles, ctx, &dataset).await;
    let store = roles.big_data().unwrap();
    let first = store.get(&ctx, &surface_key(1)).await.unwrap().unwrap();

    run_surface_pipeline(&roles, ctx, &dataset).await;
    let second = store.get(&ctx, &surface_key(1)).await.unwrap().unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_size_and_surface_pipelines_run_concurrently() {
    let roles = StoreRoles::in_memory();
    let ctx = VersionedContext::new(Uuid::new_v4(), Uuid::new_v4());
    let dataset = Dataset::new("concurrent");
    populate(&roles, ctx).await;

    // Independent pipelines drain separately-scanned chunk sources.
    tokio::join!(
        run_size_pipeline(&roles, ctx),
        run_surface_pipeline(&roles, ctx, &dataset),
    );

    let query = SizeRangeQuery::new(&roles, ctx).unwrap();
    assert_eq!(query.labels_in_range(1, 0).await.unwrap(), vec![1, 2]);
    assert!(get_surface(&roles, &ctx, 1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sparse_volume_blob_matches_index() {
    let roles = StoreRoles::in_memory();
    let ctx = VersionedContext::new(Uuid::new_v4(), Uuid::new_v4());
    let expected = populate(&roles, ctx).await;

    let encoder = SparseVolumeEncoder::new(roles.small_data().unwrap(), ctx);
    let blob = encoder.encode_label(1).await.unwrap();

    let runs = RleSet::decode(3, &blob[12..]).unwrap();
    let (voxels, _) = runs.stats();
    assert_eq!(voxels, expected[&1]);
    assert_eq!(
        u32::from_le_bytes(blob[8..12].try_into().unwrap()) as usize,
        runs.len()
    );
}
