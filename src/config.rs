//! Configuration management for WSI Tiler.
//!
//! This module provides:
//! - Command-line arguments via clap, one subcommand per entry point
//! - Environment variables with `WSI_TILER_` prefix
//! - [`PyramidConfig`], the explicit settings struct handed to the generator
//!
//! # Environment Variables
//!
//! - `WSI_TILER_TILE_SIZE` - Tile edge length in pixels (default: 512)
//! - `WSI_TILER_BLOCK_SIZE` - Max source block edge per read (default: 4096)
//! - `WSI_TILER_OUTPUT` - Root of the tile hierarchy (default: ./tiles)
//! - `WSI_TILER_JPEG_QUALITY` - JPEG quality for written tiles (default: 80)
//! - `WSI_TILER_WORKERS` - Tile workers per job, 1 = sequential (default: 1)

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::tile::{
    is_valid_quality, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Default maximum source block edge read in one call.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Default output directory.
pub const DEFAULT_OUTPUT_BASE: &str = "tiles";

/// Default number of tile workers (sequential generation).
pub const DEFAULT_WORKERS: usize = 1;

/// Largest accepted tile edge.
pub const MAX_TILE_SIZE: u32 = 8192;

/// Largest accepted block edge.
pub const MAX_BLOCK_SIZE: u32 = 65536;

// =============================================================================
// Pyramid Configuration
// =============================================================================

/// Settings for a pyramid generator, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidConfig {
    /// Tile edge length in pixels
    pub tile_size: u32,

    /// Maximum edge of a source block requested in one read
    pub block_size: u32,

    /// Root of the `{image_id}/{level}/tile_{x}_{y}.jpg` hierarchy
    pub output_base: PathBuf,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Concurrent tile workers for whole-job generation (1 = sequential)
    pub workers: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            output_base: PathBuf::from(DEFAULT_OUTPUT_BASE),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl PyramidConfig {
    /// Create a configuration with default sizes writing under `output_base`.
    pub fn new(output_base: impl Into<PathBuf>) -> Self {
        Self {
            output_base: output_base.into(),
            ..Self::default()
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }

        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(format!(
                "block_size must be between 1 and {}",
                MAX_BLOCK_SIZE
            ));
        }

        if !is_valid_quality(self.jpeg_quality) {
            return Err(format!(
                "jpeg_quality must be between {} and {}",
                MIN_JPEG_QUALITY, MAX_JPEG_QUALITY
            ));
        }

        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }

        if self.output_base.as_os_str().is_empty() {
            return Err("output path is required. Set --output or WSI_TILER_OUTPUT".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Tiler - Generates zoomable tile pyramids from large microscopy images.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate the full pyramid for an image.
    Generate(GenerateConfig),

    /// Generate a single tile.
    Tile(TileConfig),

    /// Print the selected series and pyramid plan without writing tiles.
    Describe(DescribeConfig),
}

/// Pyramid options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct PyramidArgs {
    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "WSI_TILER_TILE_SIZE")]
    pub tile_size: u32,

    /// Maximum source block edge requested per read.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_TILER_BLOCK_SIZE")]
    pub block_size: u32,

    /// Root directory of the tile hierarchy.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_BASE, env = "WSI_TILER_OUTPUT")]
    pub output: PathBuf,

    /// JPEG quality for written tiles (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_TILER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Concurrent tile workers (1 generates tiles sequentially).
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "WSI_TILER_WORKERS")]
    pub workers: usize,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PyramidArgs {
    pub fn to_pyramid_config(&self) -> PyramidConfig {
        PyramidConfig {
            tile_size: self.tile_size,
            block_size: self.block_size,
            output_base: self.output.clone(),
            jpeg_quality: self.jpeg_quality,
            workers: self.workers,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GenerateConfig {
    /// Source image path.
    pub input: PathBuf,

    /// Image id used as the output directory name (defaults to the file stem).
    #[arg(long)]
    pub image_id: Option<String>,

    /// Print the job report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub pyramid: PyramidArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    /// Source image path.
    pub input: PathBuf,

    /// Pyramid level (0 = coarsest).
    #[arg(long)]
    pub level: u32,

    /// Tile column.
    #[arg(short = 'x', long)]
    pub tile_x: u32,

    /// Tile row.
    #[arg(short = 'y', long)]
    pub tile_y: u32,

    /// Image id used as the output directory name (defaults to the file stem).
    #[arg(long)]
    pub image_id: Option<String>,

    #[command(flatten)]
    pub pyramid: PyramidArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DescribeConfig {
    /// Source image path.
    pub input: PathBuf,

    #[command(flatten)]
    pub pyramid: PyramidArgs,
}

/// Resolve an image id, falling back to the source file stem.
pub fn resolve_image_id(explicit: Option<&str>, input: &Path) -> Result<String, String> {
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            format!(
                "Cannot derive an image id from {}. Set --image-id",
                input.display()
            )
        })
}

// =============================================================================
// Tests
// =============================================================================
