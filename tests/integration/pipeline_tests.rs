//! Whole-job pipeline tests.
//!
//! Tests verify:
//! - Status transitions on success, failure and rejection
//! - Level and tile layout of a finished pyramid
//! - Ready notifications
//! - Admission guard for concurrent jobs on one image
//! - Parallel generation matches sequential output

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;

use wsi_tiler::error::{PyramidError, SourceError};
use wsi_tiler::job::{JobStatus, MemoryCatalog, PyramidGenerator};
use wsi_tiler::pyramid::SelectionRule;
use wsi_tiler::source::RasterOpener;
use wsi_tiler::PyramidConfig;

use super::test_utils::{all_tiles, is_valid_jpeg, tiles_in_level, MockOpener, MOCK_SOURCE};

fn generator(
    opener: MockOpener,
    config: PyramidConfig,
) -> (PyramidGenerator<MockOpener, MemoryCatalog>, Arc<MemoryCatalog>) {
    let catalog = Arc::new(MemoryCatalog::new());
    let generator = PyramidGenerator::new(opener, Arc::clone(&catalog), config).unwrap();
    (generator, catalog)
}

// =============================================================================
// Success Path
// =============================================================================

#[tokio::test]
async fn test_success_status_sequence_and_layout() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::rgb(2000, 1500);
    let (generator, catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));
    let mut ready = catalog.subscribe();

    let report = generator
        .generate("img-1", Path::new(MOCK_SOURCE))
        .await
        .unwrap();

    assert_eq!(
        catalog.history("img-1").await,
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Ready]
    );
    assert_eq!(ready.recv().await.unwrap(), "img-1");

    assert_eq!(report.max_level, 2);
    assert_eq!((report.width, report.height), (2000, 1500));
    assert_eq!(report.tiles_written, 12 + 4 + 1);
    assert_eq!(report.malformed_blocks, 0);

    assert_eq!(tiles_in_level(output.path(), "img-1", 0), vec!["tile_0_0.jpg"]);
    assert_eq!(tiles_in_level(output.path(), "img-1", 1).len(), 4);
    let top = tiles_in_level(output.path(), "img-1", 2);
    assert_eq!(top.len(), 12);
    assert!(top.contains(&"tile_3_2.jpg".to_string()));
    assert!(tiles_in_level(output.path(), "img-1", 3).is_empty());

    let bytes = std::fs::read(output.path().join("img-1/2/tile_3_0.jpg")).unwrap();
    assert!(is_valid_jpeg(&bytes));
    let (width, height) = generator.writer().encoder().dimensions(&bytes).unwrap();
    assert_eq!((width, height), (464, 512));

    // One reader for the whole job, released at the end
    assert_eq!(opener.open_count(), 1);
    assert_eq!(opener.close_count(), 1);
    assert!(!generator.is_running("img-1"));
}

#[tokio::test]
async fn test_selected_series_drives_the_job() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder()
        .series(1, 300, 300)
        .series(3, 1200, 1100)
        .series(1, 100, 100)
        .build();
    let (generator, _catalog) = generator(
        opener.clone(),
        PyramidConfig::new(output.path()).with_tile_size(1024),
    );

    let report = generator
        .generate("multi", Path::new(MOCK_SOURCE))
        .await
        .unwrap();

    assert_eq!(report.series_index, 1);
    assert_eq!((report.width, report.height), (1200, 1100));
    assert_eq!(opener.selected(), vec![1]);
    assert!(opener.requests().iter().all(|r| r.series == 1));
}

#[tokio::test]
async fn test_describe_reports_plan_without_writing() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder()
        .series(1, 200, 200)
        .series(1, 9000, 9000)
        .build();
    let (generator, catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));

    let descriptor = generator.describe(Path::new(MOCK_SOURCE)).await.unwrap();

    assert_eq!(descriptor.series_count, 2);
    assert_eq!(descriptor.selected.index, 1);
    assert_eq!(descriptor.selected.rule, SelectionRule::LargestArea);
    // ceil(log2(9000 / 512)) = 5
    assert_eq!(descriptor.max_level, 5);
    assert_eq!(descriptor.levels.len(), 6);

    assert_eq!(opener.read_count(), 0);
    assert_eq!(opener.close_count(), 1);
    assert!(catalog.history("multi").await.is_empty());
    assert!(all_tiles(output.path(), "multi").is_empty());
}

#[tokio::test]
async fn test_submit_runs_in_background() {
    let output = tempfile::tempdir().unwrap();
    let (generator, catalog) = generator(MockOpener::rgb(600, 400), PyramidConfig::new(output.path()));
    let mut ready = catalog.subscribe();

    let handle = generator
        .submit("bg", Path::new(MOCK_SOURCE))
        .await
        .unwrap();

    assert_eq!(ready.recv().await.unwrap(), "bg");
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.tiles_written, 2 + 1);
    assert_eq!(catalog.status("bg").await, Some(JobStatus::Ready));
}

#[tokio::test]
async fn test_malformed_blocks_are_recovered() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder()
        .series(3, 300, 200)
        .truncate_reads(10)
        .build();
    let (generator, catalog) = generator(opener, PyramidConfig::new(output.path()));

    let report = generator
        .generate("short", Path::new(MOCK_SOURCE))
        .await
        .unwrap();

    assert_eq!(catalog.status("short").await, Some(JobStatus::Ready));
    assert!(report.malformed_blocks > 0);
    assert_eq!(report.malformed_blocks, report.blocks_read);
    assert_eq!(all_tiles(output.path(), "short").len() as u64, report.tiles_written);
}

// =============================================================================
// Failure Paths
// =============================================================================

#[tokio::test]
async fn test_failure_mid_pyramid_records_error() {
    let output = tempfile::tempdir().unwrap();
    // Levels: 0 = 1 tile, 1 = 2 tiles, 2 = 6 tiles, 3 = 20 tiles.
    // One read per tile, so read 4 is the first tile of level 2.
    let opener = MockOpener::builder()
        .series(3, 1200, 900)
        .fail_on_read(4)
        .build();
    let (generator, catalog) = generator(
        opener.clone(),
        PyramidConfig::new(output.path()).with_tile_size(256),
    );

    let result = generator.generate("broken", Path::new(MOCK_SOURCE)).await;

    assert!(matches!(
        result,
        Err(PyramidError::SourceRead(SourceError::Io(_)))
    ));
    assert_eq!(
        catalog.history("broken").await,
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Error]
    );

    // Tiles before the failure stay on disk, nothing after it is written
    assert_eq!(tiles_in_level(output.path(), "broken", 0).len(), 1);
    assert_eq!(tiles_in_level(output.path(), "broken", 1).len(), 2);
    assert!(tiles_in_level(output.path(), "broken", 2).is_empty());
    assert!(!output.path().join("broken").join("3").exists());

    assert_eq!(opener.read_count(), 4);
    assert_eq!(opener.close_count(), opener.open_count());
    assert!(!generator.is_running("broken"));
}

#[tokio::test]
async fn test_unsupported_format_stays_pending() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder().series(3, 100, 100).unsupported().build();
    let (generator, catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));

    let result = generator.submit("odd", Path::new(MOCK_SOURCE)).await;

    match result {
        Err(e @ PyramidError::UnsupportedFormat { .. }) => assert!(e.is_preflight()),
        Err(e) => panic!("Expected UnsupportedFormat, got {:?}", e),
        Ok(_) => panic!("Expected UnsupportedFormat, got a running job"),
    }
    assert_eq!(catalog.history("odd").await, vec![JobStatus::Pending]);
    assert_eq!(opener.open_count(), 0);
    assert!(all_tiles(output.path(), "odd").is_empty());
    assert!(!generator.is_running("odd"));
}

#[tokio::test]
async fn test_empty_container_is_configuration_error() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder().build();
    let (generator, catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));

    let result = generator.generate("empty", Path::new(MOCK_SOURCE)).await;

    assert!(matches!(result, Err(PyramidError::Configuration(_))));
    assert_eq!(
        catalog.history("empty").await,
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Error]
    );
    assert_eq!(opener.close_count(), 1);
}

#[tokio::test]
async fn test_missing_source_file() {
    let output = tempfile::tempdir().unwrap();
    let catalog = Arc::new(MemoryCatalog::new());
    let generator = PyramidGenerator::new(
        RasterOpener::new(),
        Arc::clone(&catalog),
        PyramidConfig::new(output.path()),
    )
    .unwrap();

    let missing = output.path().join("does-not-exist.tif");
    let result = generator.generate("missing", &missing).await;

    assert!(matches!(
        result,
        Err(PyramidError::SourceRead(SourceError::NotFound(_)))
    ));
    assert_eq!(catalog.history("missing").await, vec![JobStatus::Pending]);
}

#[tokio::test]
async fn test_invalid_image_id_rejected_before_status() {
    let output = tempfile::tempdir().unwrap();
    let (generator, catalog) = generator(MockOpener::rgb(100, 100), PyramidConfig::new(output.path()));

    let result = generator.generate("../up", Path::new(MOCK_SOURCE)).await;

    assert!(matches!(result, Err(PyramidError::InvalidImageId { .. })));
    assert!(catalog.history("../up").await.is_empty());
}

#[test]
fn test_invalid_config_rejected() {
    let catalog = Arc::new(MemoryCatalog::new());
    let result = PyramidGenerator::new(
        MockOpener::rgb(10, 10),
        catalog,
        PyramidConfig::new("tiles").with_tile_size(0),
    );
    assert!(matches!(result, Err(PyramidError::Configuration(_))));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_second_job_for_same_image_rejected() {
    let output = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let opener = MockOpener::builder()
        .series(3, 300, 300)
        .gate(Arc::clone(&gate))
        .build();
    let (generator, catalog) = generator(opener, PyramidConfig::new(output.path()));

    let handle = generator
        .submit("busy", Path::new(MOCK_SOURCE))
        .await
        .unwrap();
    assert!(generator.is_running("busy"));

    let second = generator.submit("busy", Path::new(MOCK_SOURCE)).await;
    assert!(matches!(
        second,
        Err(PyramidError::JobAlreadyRunning { .. })
    ));

    // Other images are not blocked
    assert!(generator.is_running("busy"));
    assert!(!generator.is_running("other"));

    gate.add_permits(1);
    handle.await.unwrap().unwrap();

    assert_eq!(catalog.status("busy").await, Some(JobStatus::Ready));
    assert!(!generator.is_running("busy"));

    // Once finished the image can be regenerated
    let again = generator
        .generate("busy", Path::new(MOCK_SOURCE))
        .await
        .unwrap();
    assert_eq!(again.tiles_written, 1);
}

#[tokio::test]
async fn test_parallel_output_matches_sequential() {
    let sequential_dir = tempfile::tempdir().unwrap();
    let parallel_dir = tempfile::tempdir().unwrap();

    let (sequential, _) = generator(
        MockOpener::rgb(1200, 900),
        PyramidConfig::new(sequential_dir.path()).with_tile_size(256),
    );
    let parallel_opener = MockOpener::rgb(1200, 900);
    let (parallel, parallel_catalog) = generator(
        parallel_opener.clone(),
        PyramidConfig::new(parallel_dir.path())
            .with_tile_size(256)
            .with_workers(4),
    );

    let seq_report = sequential
        .generate("same", Path::new(MOCK_SOURCE))
        .await
        .unwrap();
    let par_report = parallel
        .generate("same", Path::new(MOCK_SOURCE))
        .await
        .unwrap();

    assert_eq!(seq_report.tiles_written, 29);
    assert_eq!(par_report.tiles_written, 29);
    assert_eq!(par_report.blocks_read, seq_report.blocks_read);
    assert_eq!(par_report.workers, 4);
    assert_eq!(
        parallel_catalog.history("same").await,
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Ready]
    );

    let tiles = all_tiles(sequential_dir.path(), "same");
    assert_eq!(tiles, all_tiles(parallel_dir.path(), "same"));
    for tile in &tiles {
        let a = std::fs::read(sequential_dir.path().join("same").join(tile)).unwrap();
        let b = std::fs::read(parallel_dir.path().join("same").join(tile)).unwrap();
        assert_eq!(a, b, "tile {} differs", tile.display());
    }

    // One reader to plan, then one per tile
    assert_eq!(parallel_opener.open_count(), 1 + 29);
    assert_eq!(parallel_opener.close_count(), 1 + 29);
}

#[tokio::test]
async fn test_parallel_failure_records_error() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder()
        .series(3, 1200, 900)
        .fail_on_read(5)
        .build();
    let (generator, catalog) = generator(
        opener.clone(),
        PyramidConfig::new(output.path())
            .with_tile_size(256)
            .with_workers(3),
    );

    let result = generator.generate("par", Path::new(MOCK_SOURCE)).await;

    assert!(matches!(result, Err(PyramidError::SourceRead(_))));
    assert_eq!(catalog.status("par").await, Some(JobStatus::Error));
    assert!((all_tiles(output.path(), "par").len() as u64) < 29);
    // Every dispatched tile finished and released its reader
    assert_eq!(opener.close_count(), opener.open_count());
}

#[tokio::test]
async fn test_panicking_tile_task_releases_readers() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder()
        .series(3, 1200, 900)
        .panic_on_read(2)
        .build();
    let (generator, catalog) = generator(
        opener.clone(),
        PyramidConfig::new(output.path())
            .with_tile_size(256)
            .with_workers(2),
    );

    let result = generator.generate("crash", Path::new(MOCK_SOURCE)).await;

    match result {
        Err(PyramidError::Worker { message }) => {
            assert!(message.contains("decoder crashed"), "got {}", message)
        }
        other => panic!("expected a worker error, got {:?}", other),
    }
    assert_eq!(catalog.status("crash").await, Some(JobStatus::Error));
    assert!(opener.open_count() >= 2);
    assert_eq!(opener.close_count(), opener.open_count());
    assert!(!generator.is_running("crash"));
}

#[tokio::test]
async fn test_panicking_background_job_releases_reader() {
    let output = tempfile::tempdir().unwrap();
    let opener = MockOpener::builder()
        .series(3, 600, 400)
        .panic_on_read(3)
        .build();
    let (generator, _catalog) = generator(opener.clone(), PyramidConfig::new(output.path()));

    let handle = generator
        .submit("crash-bg", Path::new(MOCK_SOURCE))
        .await
        .unwrap();
    let joined = handle.await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(opener.open_count(), 1);
    assert_eq!(opener.close_count(), 1);
    // The admission guard is dropped with the task
    assert!(!generator.is_running("crash-bg"));
}

#[tokio::test]
async fn test_rerun_after_ready_restarts_lifecycle() {
    let output = tempfile::tempdir().unwrap();
    let (generator, catalog) = generator(MockOpener::rgb(600, 400), PyramidConfig::new(output.path()));

    generator.generate("again", Path::new(MOCK_SOURCE)).await.unwrap();
    generator.generate("again", Path::new(MOCK_SOURCE)).await.unwrap();

    assert_eq!(
        catalog.history("again").await,
        vec![
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Ready,
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Ready,
        ]
    );
}
