//! Pyramid planning and tile assembly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          ImageSourceReader              │
//! └────────────────────┬────────────────────┘
//!                      │ series geometry
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   Series Selector  →  Level Planner     │
//! │   (SelectedSeries)    (PyramidPlan)     │
//! └────────────────────┬────────────────────┘
//!                      │ TileCoord
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           RegionAssembler               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ bounded block│  │ decode_block +  │  │
//! │  │ reads        │→ │ box filter      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ RgbImage
//!                      ▼
//!                  TileWriter
//! ```
//!
//! # Components
//!
//! - [`select_series`]: picks the full-resolution series among those embedded
//! - [`PyramidPlan`]: level depth, per-level dimensions and tile grids
//! - [`RegionAssembler`]: streams a tile's source rectangle in blocks and
//!   downsamples it into an RGB buffer
//! - [`decode_block`]: raw bytes to RGB with neutral-gray recovery

mod assembler;
mod pixel;
mod plan;
mod series;

pub use assembler::{block_grid, AssembledTile, BlockRect, RegionAssembler, TileAccumulator};
pub use pixel::{decode_block, ChannelLayout, DecodedBlock, PixelLayout, NEUTRAL_GRAY};
pub use plan::{max_level_for, LevelInfo, PyramidPlan, SourceRect, TileCoord};
pub use series::{
    select_from_reader, select_series, SelectedSeries, SelectionRule, MIN_SLIDE_DIMENSION,
    RGB_CHANNELS,
};
