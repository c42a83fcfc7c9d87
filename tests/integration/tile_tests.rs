//! Single-tile generation tests.
//!
//! Tests verify:
//! - Regenerating a tile is byte-identical and touches no job status
//! - A regenerated tile equals the one written by the whole job
//! - Source reads never exceed the configured block size
//! - Out-of-range coordinates are rejected before any pixel read

use std::path::Path;
use std::sync::Arc;

use wsi_tiler::error::PyramidError;
use wsi_tiler::job::{MemoryCatalog, PyramidGenerator};
use wsi_tiler::pyramid::TileCoord;
use wsi_tiler::tile::tile_path;
use wsi_tiler::PyramidConfig;

use super::test_utils::{is_valid_jpeg, MockOpener, MOCK_SOURCE};

fn generator(
    opener: MockOpener,
    config: PyramidConfig,
) -> (PyramidGenerator<MockOpener, MemoryCatalog>, Arc<MemoryCatalog>) {
    let catalog = Arc::new(MemoryCatalog::new());
    let generator = PyramidGenerator::new(opener, Arc::clone(&catalog), config).unwrap();
    (generator, catalog)
}

#[tokio::test]
async fn test_single_tile_is_idempotent() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::rgb(2000, 1500);
    let (generator, catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));
    let coord = TileCoord::new(1, 1, 0);

    let first = generator
        .generate_tile("img", Path::new(MOCK_SOURCE), coord)
        .await
        .unwrap();
    let first_bytes = std::fs::read(&first.path).unwrap();

    let second = generator
        .generate_tile("img", Path::new(MOCK_SOURCE), coord)
        .await
        .unwrap();
    let second_bytes = std::fs::read(&second.path).unwrap();

    assert_eq!(first.path, second.path);
    assert_eq!(first.path, tile_path(output.path(), "img", coord));
    assert!(is_valid_jpeg(&first_bytes));
    assert_eq!(first_bytes, second_bytes);

    // Status belongs to whole jobs only
    assert!(catalog.history("img").await.is_empty());
    // Each call opens and releases its own reader
    assert_eq!(opener.open_count(), 2);
    assert_eq!(opener.close_count(), 2);
}

#[tokio::test]
async fn test_regenerated_tile_matches_job_output() {
    let output = tempfile::tempdir().unwrap();
    let (generator, _catalog) = generator(
        MockOpener::rgb(1200, 900),
        PyramidConfig::new(output.path()).with_tile_size(256),
    );

    generator
        .generate("job", Path::new(MOCK_SOURCE))
        .await
        .unwrap();

    let coord = TileCoord::new(2, 2, 1);
    let path = tile_path(output.path(), "job", coord);
    let from_job = std::fs::read(&path).unwrap();

    generator
        .generate_tile("job", Path::new(MOCK_SOURCE), coord)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), from_job);
}

#[tokio::test]
async fn test_edge_tile_is_truncated() {
    let output = tempfile::tempdir().unwrap();
    let (generator, _catalog) = generator(MockOpener::rgb(2000, 1500), PyramidConfig::new(output.path()));

    let outcome = generator
        .generate_tile("edge", Path::new(MOCK_SOURCE), TileCoord::new(2, 3, 2))
        .await
        .unwrap();

    assert_eq!((outcome.width, outcome.height), (464, 1500 - 2 * 512));
    let bytes = std::fs::read(&outcome.path).unwrap();
    assert_eq!(
        generator.writer().encoder().dimensions(&bytes).unwrap(),
        (464, 476)
    );
}

#[tokio::test]
async fn test_reads_never_exceed_block_size() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::rgb(3000, 2000);
    let (generator, _catalog) = generator(
        opener.clone(),
        PyramidConfig::new(output.path()).with_block_size(300),
    );

    // Level 0 covers the whole 3000x2000 source
    let outcome = generator
        .generate_tile("blocks", Path::new(MOCK_SOURCE), TileCoord::new(0, 0, 0))
        .await
        .unwrap();

    let requests = opener.requests();
    assert_eq!(requests.len(), 10 * 7);
    assert_eq!(outcome.blocks_read, requests.len());
    assert!(requests.iter().all(|r| r.width <= 300 && r.height <= 300));

    let covered: u64 = requests
        .iter()
        .map(|r| r.width as u64 * r.height as u64)
        .sum();
    assert_eq!(covered, 3000 * 2000);
}

#[tokio::test]
async fn test_out_of_range_tiles_rejected_before_reading() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::rgb(2000, 1500);
    let (generator, _catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));

    let result = generator
        .generate_tile("oob", Path::new(MOCK_SOURCE), TileCoord::new(3, 0, 0))
        .await;
    assert!(matches!(
        result,
        Err(PyramidError::InvalidLevel {
            level: 3,
            max_level: 2
        })
    ));

    let result = generator
        .generate_tile("oob", Path::new(MOCK_SOURCE), TileCoord::new(2, 4, 0))
        .await;
    assert!(matches!(result, Err(PyramidError::TileOutOfBounds { .. })));

    assert_eq!(opener.read_count(), 0);
    assert_eq!(opener.close_count(), opener.open_count());
    assert!(!output.path().join("oob").exists());
}

#[tokio::test]
async fn test_single_tile_uses_selected_series() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder()
        .series(1, 300, 300)
        .series(3, 1500, 1200)
        .build();
    let (generator, _catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));

    generator
        .generate_tile("series", Path::new(MOCK_SOURCE), TileCoord::new(0, 0, 0))
        .await
        .unwrap();

    assert_eq!(opener.selected(), vec![1]);
    assert!(opener.requests().iter().all(|r| r.series == 1));
}
