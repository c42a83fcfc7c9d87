//! Pyramid level planning.
//!
//! Level `max_level` is the source at native resolution; every level below
//! halves both dimensions, down to level 0 which is the coarsest. The depth is
//! chosen so that the native level needs at most `2^max_level` tiles along its
//! longest edge:
//!
//! ```text
//! max_level = ceil(log2(max(width, height) / tile_size)), clamped to 0
//! scale(L)  = 2^(L - max_level)
//! ```
//!
//! Scales are exact powers of two, so level dimensions and the mapping back to
//! source coordinates are computed with shifts rather than floating point.

use serde::Serialize;

use crate::error::PyramidError;

// =============================================================================
// Tile Coordinates
// =============================================================================

/// Address of one tile in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileCoord {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

/// A rectangle in native source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SourceRect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// =============================================================================
// Level Information
// =============================================================================

/// Dimensions and tile grid of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelInfo {
    /// Level index (0 = coarsest)
    pub level: u32,

    /// Scale relative to the source, `2^(level - max_level)`
    pub scale: f64,

    /// Scaled width in pixels
    pub width: u32,

    /// Scaled height in pixels
    pub height: u32,

    /// Number of tiles in X direction
    pub tiles_x: u32,

    /// Number of tiles in Y direction
    pub tiles_y: u32,
}

impl LevelInfo {
    pub fn tile_count(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }
}

// =============================================================================
// Pyramid Plan
// =============================================================================

/// Level layout for one source image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidPlan {
    width: u32,
    height: u32,
    tile_size: u32,
    max_level: u32,
    levels: Vec<LevelInfo>,
}

/// Smallest level count such that `tile_size * 2^max_level` covers the
/// longest edge. Equal to `ceil(log2(longest / tile_size))` clamped at 0.
pub fn max_level_for(width: u32, height: u32, tile_size: u32) -> u32 {
    let longest = width.max(height) as u64;
    let mut covered = tile_size.max(1) as u64;
    let mut level = 0;
    while covered < longest {
        covered <<= 1;
        level += 1;
    }
    level
}

impl PyramidPlan {
    /// Plan the pyramid for a `width`x`height` source.
    pub fn new(width: u32, height: u32, tile_size: u32) -> Result<Self, PyramidError> {
        if tile_size == 0 {
            return Err(PyramidError::Configuration(
                "tile size must be greater than 0".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(PyramidError::Configuration(format!(
                "source has no pixels: {}x{}",
                width, height
            )));
        }

        let max_level = max_level_for(width, height, tile_size);

        let levels = (0..=max_level)
            .map(|level| {
                let shift = max_level - level;
                let scaled_width = (width as u64 >> shift) as u32;
                let scaled_height = (height as u64 >> shift) as u32;
                LevelInfo {
                    level,
                    scale: 0.5f64.powi(shift as i32),
                    width: scaled_width,
                    height: scaled_height,
                    tiles_x: scaled_width.div_ceil(tile_size),
                    tiles_y: scaled_height.div_ceil(tile_size),
                }
            })
            .collect();

        Ok(Self {
            width,
            height,
            tile_size,
            max_level,
            levels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Number of levels, `max_level + 1`.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[LevelInfo] {
        &self.levels
    }

    pub fn level(&self, level: u32) -> Option<&LevelInfo> {
        self.levels.get(level as usize)
    }

    /// Total number of tiles over all levels.
    pub fn total_tiles(&self) -> u64 {
        self.levels.iter().map(LevelInfo::tile_count).sum()
    }

    /// Level info for a tile, validating its coordinates.
    pub fn check_tile(&self, coord: TileCoord) -> Result<&LevelInfo, PyramidError> {
        let info = self.level(coord.level).ok_or(PyramidError::InvalidLevel {
            level: coord.level,
            max_level: self.max_level,
        })?;

        if coord.x >= info.tiles_x || coord.y >= info.tiles_y {
            return Err(PyramidError::TileOutOfBounds {
                level: coord.level,
                x: coord.x,
                y: coord.y,
                max_x: info.tiles_x,
                max_y: info.tiles_y,
            });
        }

        Ok(info)
    }

    /// Pixel dimensions of a tile; edge tiles are truncated.
    pub fn tile_dimensions(&self, coord: TileCoord) -> Result<(u32, u32), PyramidError> {
        let info = self.check_tile(coord)?;
        let width = self.tile_size.min(info.width - coord.x * self.tile_size);
        let height = self.tile_size.min(info.height - coord.y * self.tile_size);
        Ok((width, height))
    }

    /// Source rectangle covered by a tile, clamped to the native bounds.
    pub fn source_rect(&self, coord: TileCoord) -> Result<SourceRect, PyramidError> {
        let (tile_width, tile_height) = self.tile_dimensions(coord)?;
        let shift = self.max_level - coord.level;

        let x = ((coord.x as u64 * self.tile_size as u64) << shift).min(self.width as u64);
        let y = ((coord.y as u64 * self.tile_size as u64) << shift).min(self.height as u64);
        let width = ((tile_width as u64) << shift).min(self.width as u64 - x);
        let height = ((tile_height as u64) << shift).min(self.height as u64 - y);

        Ok(SourceRect {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        })
    }

    /// Every tile, levels ascending and row-major within a level.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.levels.iter().flat_map(|info| {
            (0..info.tiles_y)
                .flat_map(move |y| (0..info.tiles_x).map(move |x| TileCoord::new(info.level, x, y)))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
