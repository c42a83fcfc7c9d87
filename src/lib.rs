//! # WSI Tiler
//!
//! Generates zoomable tile pyramids from very large multi-resolution
//! microscopy images.
//!
//! A source container usually holds several embedded series (the slide
//! itself, thumbnails, label and macro images). The generator picks the
//! full-resolution series, plans the pyramid levels, streams source pixels in
//! bounded blocks, downsamples them and writes fixed-size JPEG tiles laid out
//! for a zoomable web viewer.
//!
//! ## Features
//!
//! - **Bounded memory**: source regions are read in blocks no larger than
//!   `block_size` x `block_size`, whatever the image size
//! - **Series selection**: the first large RGB series, else the largest one
//! - **Status reporting**: PENDING → PROCESSING → READY | ERROR through a
//!   [`CatalogService`], with a completion notification
//! - **Single-tile regeneration**: any tile can be rebuilt on its own
//! - **Optional parallelism**: tiles dispatched onto a bounded worker pool
//!
//! ## Architecture
//!
//! - [`source`] - Reader capability for multi-series sources, plus a raster adapter
//! - [`pyramid`] - Series selection, level planning and region assembly
//! - [`tile`] - JPEG encoding and the on-disk tile layout
//! - [`job`] - Orchestrator, status machine and catalog seam
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use wsi_tiler::{MemoryCatalog, PyramidConfig, PyramidGenerator, RasterOpener};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wsi_tiler::PyramidError> {
//!     let catalog = Arc::new(MemoryCatalog::new());
//!     let config = PyramidConfig::new("tiles").with_tile_size(256);
//!     let generator = PyramidGenerator::new(RasterOpener::new(), catalog, config)?;
//!
//!     let report = generator.generate("slide-1", Path::new("slide.tif")).await?;
//!     println!("{} tiles over {} levels", report.tiles_written, report.max_level + 1);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod pyramid;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, PyramidConfig};
pub use error::{CatalogError, FormatError, MalformedPixelBlockError, PyramidError, SourceError};
pub use job::{
    CatalogService, ImageDescriptor, JobReport, JobStatus, MemoryCatalog, PyramidGenerator,
    TileOutcome,
};
pub use pyramid::{
    select_series, LevelInfo, PyramidPlan, RegionAssembler, SelectedSeries, SourceRect, TileCoord,
};
pub use source::{
    detect_format, ImageSourceReader, RasterOpener, RasterReader, SeriesGeometry, SourceFormat,
    SourceOpener,
};
pub use tile::{tile_path, JpegTileEncoder, TileWriter, DEFAULT_JPEG_QUALITY};
