//! Pyramid generation orchestrator.
//!
//! Drives a whole job, or a single tile, from source path to written tiles
//! and owns the job state machine.
//!
//! # Whole job
//!
//! ```text
//!  accept (synchronous)            run (inline or background task)
//! ┌──────────────────────┐       ┌───────────────────────────────────────┐
//! │ validate image id    │       │ PROCESSING                            │
//! │ admission guard      │──────▶│ open reader, select series, plan      │
//! │ PENDING              │       │ for level in 0..=max, tiles row-major │
//! │ detect format        │       │   assemble → write                    │
//! └──────────────────────┘       │ READY + notify  |  ERROR on failure   │
//!                                └───────────────────────────────────────┘
//! ```
//!
//! Errors raised during acceptance are returned to the caller and leave the
//! status at PENDING (or untouched). Anything after PROCESSING is recorded as
//! ERROR. Tiles written before a failure stay on disk.
//!
//! With `workers > 1` tiles are dispatched onto a bounded pool. Each tile task
//! opens its own reader, held in an [`OpenReader`] so it is closed even when
//! the task panics or is aborted. No further tiles are dispatched after the first
//! failure, and tasks already running are allowed to finish.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::PyramidConfig;
use crate::error::PyramidError;
use crate::pyramid::{
    select_from_reader, LevelInfo, PyramidPlan, RegionAssembler, SelectedSeries, TileCoord,
};
use crate::source::{ImageSourceReader, OpenReader, SourceFormat, SourceOpener};
use crate::tile::{validate_image_id, JpegTileEncoder, TileWriter};

use super::catalog::CatalogService;
use super::status::JobStatus;

// =============================================================================
// Results
// =============================================================================

/// Summary of a completed whole-job generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub image_id: String,
    pub series_index: usize,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub max_level: u32,
    pub tiles_written: u64,
    pub blocks_read: u64,
    /// Blocks recovered by neutral-gray substitution
    pub malformed_blocks: u64,
    pub workers: usize,
    pub elapsed_ms: u64,
}

/// Metadata for a source: selected series and pyramid plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDescriptor {
    pub source: String,
    pub format: SourceFormat,
    pub series_count: usize,
    pub selected: SelectedSeries,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub max_level: u32,
    pub total_tiles: u64,
    pub levels: Vec<LevelInfo>,
}

/// Result of producing one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileOutcome {
    pub coord: TileCoord,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub blocks_read: usize,
    pub malformed_blocks: usize,
}

/// Running totals while a job writes tiles.
#[derive(Debug, Default)]
struct TileTotals {
    tiles_written: u64,
    blocks_read: u64,
    malformed_blocks: u64,
}

impl TileTotals {
    fn add(&mut self, outcome: &TileOutcome) {
        self.tiles_written += 1;
        self.blocks_read += outcome.blocks_read as u64;
        self.malformed_blocks += outcome.malformed_blocks as u64;
    }
}

// =============================================================================
// Admission Guard
// =============================================================================

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Holds an image id in the in-flight set until dropped.
struct JobGuard {
    image_id: String,
    in_flight: InFlight,
}

impl JobGuard {
    fn acquire(in_flight: &InFlight, image_id: &str) -> Result<Self, PyramidError> {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(image_id.to_string()) {
            return Err(PyramidError::JobAlreadyRunning {
                image_id: image_id.to_string(),
            });
        }
        Ok(Self {
            image_id: image_id.to_string(),
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.image_id);
    }
}

// =============================================================================
// Pyramid Generator
// =============================================================================

/// Generates tile pyramids and reports their status to a catalog.
pub struct PyramidGenerator<O, C> {
    opener: Arc<O>,
    catalog: Arc<C>,
    config: PyramidConfig,
    writer: Arc<TileWriter>,
    in_flight: InFlight,
}

impl<O, C> Clone for PyramidGenerator<O, C> {
    fn clone(&self) -> Self {
        Self {
            opener: Arc::clone(&self.opener),
            catalog: Arc::clone(&self.catalog),
            config: self.config.clone(),
            writer: Arc::clone(&self.writer),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<O, C> PyramidGenerator<O, C>
where
    O: SourceOpener + 'static,
    C: CatalogService + 'static,
{
    /// Create a generator.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(opener: O, catalog: Arc<C>, config: PyramidConfig) -> Result<Self, PyramidError> {
        config.validate().map_err(PyramidError::Configuration)?;

        let writer = TileWriter::new(
            config.output_base.clone(),
            JpegTileEncoder::new(config.jpeg_quality),
        );

        Ok(Self {
            opener: Arc::new(opener),
            catalog,
            config,
            writer: Arc::new(writer),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    pub fn writer(&self) -> &TileWriter {
        &self.writer
    }

    /// Whether a whole-job generation is running for `image_id`.
    pub fn is_running(&self, image_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(image_id)
    }

    // -------------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------------

    /// Detect the format, select the series and plan the pyramid without
    /// writing anything.
    pub async fn describe(&self, source: &Path) -> Result<ImageDescriptor, PyramidError> {
        let format = self.opener.detect(source).await?;

        let mut reader = OpenReader::new(self.opener.open(source).await?);
        let series_count = reader.series_count();
        let (selected, plan) = self.select_and_plan(&mut reader)?;

        Ok(ImageDescriptor {
            source: source.display().to_string(),
            format,
            series_count,
            selected,
            width: plan.width(),
            height: plan.height(),
            tile_size: plan.tile_size(),
            max_level: plan.max_level(),
            total_tiles: plan.total_tiles(),
            levels: plan.levels().to_vec(),
        })
    }

    /// Run a whole job to completion on the current task.
    pub async fn generate(&self, image_id: &str, source: &Path) -> Result<JobReport, PyramidError> {
        let guard = self.accept(image_id, source).await?;
        self.run_job(guard, source.to_path_buf()).await
    }

    /// Accept a whole job and run it as a background task.
    ///
    /// Acceptance errors (invalid id, job already running, unsupported format,
    /// missing source) are returned here. Once this returns `Ok` the outcome
    /// is visible through the catalog status; the handle's report is
    /// informational.
    pub async fn submit(
        &self,
        image_id: &str,
        source: &Path,
    ) -> Result<JoinHandle<Result<JobReport, PyramidError>>, PyramidError> {
        let guard = self.accept(image_id, source).await?;
        let generator = self.clone();
        let source = source.to_path_buf();

        Ok(tokio::spawn(
            async move { generator.run_job(guard, source).await },
        ))
    }

    /// Generate one tile independently of any job. Does not touch status.
    ///
    /// # Errors
    ///
    /// `InvalidLevel` / `TileOutOfBounds` are returned before any pixel is
    /// read.
    pub async fn generate_tile(
        &self,
        image_id: &str,
        source: &Path,
        coord: TileCoord,
    ) -> Result<TileOutcome, PyramidError> {
        validate_image_id(image_id)?;
        self.opener.detect(source).await?;

        let mut reader = OpenReader::new(self.opener.open(source).await?);
        let (selected, plan) = self.select_and_plan(&mut reader)?;
        plan.check_tile(coord)?;
        let outcome = render_tile(
            &mut *reader,
            &self.writer,
            &plan,
            &selected,
            self.config.block_size,
            image_id,
            coord,
        )
        .await?;
        info!(
            image_id = image_id,
            level = coord.level,
            tile_x = coord.x,
            tile_y = coord.y,
            "Regenerated tile {}",
            outcome.path.display()
        );
        Ok(outcome)
    }

    // -------------------------------------------------------------------------
    // Job lifecycle
    // -------------------------------------------------------------------------

    async fn accept(&self, image_id: &str, source: &Path) -> Result<JobGuard, PyramidError> {
        validate_image_id(image_id)?;
        let guard = JobGuard::acquire(&self.in_flight, image_id)?;

        self.catalog.set_status(image_id, JobStatus::Pending).await?;

        let format = self.opener.detect(source).await.map_err(|e| {
            warn!(image_id = image_id, source = %source.display(), "Job rejected: {}", e);
            PyramidError::from(e)
        })?;

        info!(
            image_id = image_id,
            source = %source.display(),
            format = format.name(),
            "Accepted pyramid job"
        );
        Ok(guard)
    }

    async fn run_job(&self, guard: JobGuard, source: PathBuf) -> Result<JobReport, PyramidError> {
        let image_id = guard.image_id.clone();
        let start = Instant::now();

        self.catalog
            .set_status(&image_id, JobStatus::Processing)
            .await?;

        let result = if self.config.workers > 1 {
            self.generate_parallel(&image_id, &source).await
        } else {
            self.generate_sequential(&image_id, &source).await
        };

        let report = match result {
            Ok(mut report) => {
                report.elapsed_ms = start.elapsed().as_millis() as u64;
                report
            }
            Err(e) => {
                error!(image_id = %image_id, "Pyramid generation failed: {}", e);
                if let Err(status_err) = self.catalog.set_status(&image_id, JobStatus::Error).await
                {
                    warn!(image_id = %image_id, "Failed to record ERROR status: {}", status_err);
                }
                return Err(e);
            }
        };

        if let Err(e) = self.catalog.set_status(&image_id, JobStatus::Ready).await {
            error!(image_id = %image_id, "Failed to record READY status: {}", e);
            if let Err(status_err) = self.catalog.set_status(&image_id, JobStatus::Error).await {
                warn!(image_id = %image_id, "Failed to record ERROR status: {}", status_err);
            }
            return Err(e.into());
        }

        if let Err(e) = self.catalog.notify_ready(&image_id).await {
            warn!(image_id = %image_id, "Ready notification failed: {}", e);
        }

        info!(
            image_id = %image_id,
            tiles = report.tiles_written,
            max_level = report.max_level,
            malformed_blocks = report.malformed_blocks,
            elapsed_ms = report.elapsed_ms,
            "Pyramid ready"
        );

        drop(guard);
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Generation strategies
    // -------------------------------------------------------------------------

    fn select_and_plan(
        &self,
        reader: &mut O::Reader,
    ) -> Result<(SelectedSeries, PyramidPlan), PyramidError> {
        let selected = select_from_reader(reader)?;
        let plan = PyramidPlan::new(
            selected.geometry.width,
            selected.geometry.height,
            self.config.tile_size,
        )?;

        info!(
            source = reader.identifier(),
            max_level = plan.max_level(),
            tiles = plan.total_tiles(),
            "Planned {} level(s) at tile size {}",
            plan.level_count(),
            plan.tile_size()
        );
        Ok((selected, plan))
    }

    fn new_report(&self, image_id: &str, selected: &SelectedSeries, plan: &PyramidPlan) -> JobReport {
        JobReport {
            image_id: image_id.to_string(),
            series_index: selected.index,
            width: plan.width(),
            height: plan.height(),
            tile_size: plan.tile_size(),
            max_level: plan.max_level(),
            tiles_written: 0,
            blocks_read: 0,
            malformed_blocks: 0,
            workers: self.config.workers,
            elapsed_ms: 0,
        }
    }

    /// One reader for the whole job; levels ascending, tiles row-major.
    async fn generate_sequential(
        &self,
        image_id: &str,
        source: &Path,
    ) -> Result<JobReport, PyramidError> {
        let mut reader = OpenReader::new(self.opener.open(source).await?);
        self.write_all_tiles(&mut reader, image_id).await
    }

    async fn write_all_tiles(
        &self,
        reader: &mut O::Reader,
        image_id: &str,
    ) -> Result<JobReport, PyramidError> {
        let (selected, plan) = self.select_and_plan(reader)?;
        let mut totals = TileTotals::default();

        for info in plan.levels() {
            debug!(
                image_id = image_id,
                level = info.level,
                "Level {}: {}x{} scaled, {}x{} tiles",
                info.level,
                info.width,
                info.height,
                info.tiles_x,
                info.tiles_y
            );

            for y in 0..info.tiles_y {
                for x in 0..info.tiles_x {
                    let coord = TileCoord::new(info.level, x, y);
                    let outcome = render_tile(
                        reader,
                        &self.writer,
                        &plan,
                        &selected,
                        self.config.block_size,
                        image_id,
                        coord,
                    )
                    .await?;
                    totals.add(&outcome);
                }
            }
        }

        let mut report = self.new_report(image_id, &selected, &plan);
        report.tiles_written = totals.tiles_written;
        report.blocks_read = totals.blocks_read;
        report.malformed_blocks = totals.malformed_blocks;
        Ok(report)
    }

    /// Tiles on a bounded pool, one reader per tile.
    async fn generate_parallel(
        &self,
        image_id: &str,
        source: &Path,
    ) -> Result<JobReport, PyramidError> {
        let (selected, plan) = {
            let mut reader = OpenReader::new(self.opener.open(source).await?);
            self.select_and_plan(&mut reader)?
        };

        let plan = Arc::new(plan);
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks: JoinSet<Result<TileOutcome, PyramidError>> = JoinSet::new();
        let mut totals = TileTotals::default();
        let mut failure: Option<PyramidError> = None;

        for coord in plan.tiles() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| PyramidError::Worker {
                    message: e.to_string(),
                })?;

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = collect(joined, &mut totals) {
                    failure.get_or_insert(e);
                }
            }
            if failure.is_some() {
                break;
            }

            let opener = Arc::clone(&self.opener);
            let writer = Arc::clone(&self.writer);
            let plan = Arc::clone(&plan);
            let block_size = self.config.block_size;
            let image_id = image_id.to_string();
            let source = source.to_path_buf();

            tasks.spawn(async move {
                let _permit = permit;
                let mut reader = OpenReader::new(opener.open(&source).await?);
                reader.select_series(selected.index)?;
                render_tile(
                    &mut *reader,
                    &writer,
                    &plan,
                    &selected,
                    block_size,
                    &image_id,
                    coord,
                )
                .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = collect(joined, &mut totals) {
                failure.get_or_insert(e);
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let mut report = self.new_report(image_id, &selected, &plan);
        report.tiles_written = totals.tiles_written;
        report.blocks_read = totals.blocks_read;
        report.malformed_blocks = totals.malformed_blocks;
        Ok(report)
    }
}

/// Fold one finished tile task into the totals.
fn collect(
    joined: Result<Result<TileOutcome, PyramidError>, JoinError>,
    totals: &mut TileTotals,
) -> Result<(), PyramidError> {
    let outcome = joined.map_err(|e| PyramidError::Worker {
        message: e.to_string(),
    })??;
    totals.add(&outcome);
    Ok(())
}

/// Assemble and write one tile with a reader that has the series selected.
async fn render_tile<R: ImageSourceReader>(
    reader: &mut R,
    writer: &TileWriter,
    plan: &PyramidPlan,
    selected: &SelectedSeries,
    block_size: u32,
    image_id: &str,
    coord: TileCoord,
) -> Result<TileOutcome, PyramidError> {
    let assembler = RegionAssembler::new(plan, &selected.geometry, block_size);
    let tile = assembler.assemble(reader, coord).await?;
    let path = writer.write(image_id, coord, &tile.image).await?;

    Ok(TileOutcome {
        coord,
        path,
        width: tile.image.width(),
        height: tile.image.height(),
        blocks_read: tile.blocks_read,
        malformed_blocks: tile.malformed_blocks,
    })
}

// =============================================================================
// Tests
// =============================================================================
