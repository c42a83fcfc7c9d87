//! Region assembly: source pixels to one tile buffer.
//!
//! A tile at level `L` covers a source rectangle `2^(max_level - L)` times its
//! size. That rectangle can be gigapixel-sized at coarse levels, so it is read
//! in blocks no larger than `block_size` x `block_size`. Every source pixel
//! of every block is added to the running sums of the tile pixel it falls in,
//! and the tile is averaged once all blocks are in. Block edges therefore
//! never need to line up with tile pixels: a block smaller than the
//! downscale factor still contributes to the box average. Peak memory is one
//! block plus the sums for one tile regardless of the source.
//!
//! ```text
//!   source rect (srcW x srcH)              tile (tw x th)
//!  ┌──────┬──────┬───┐                    ┌────┬────┬──┐
//!  │ blk  │ blk  │   │   accumulate       │    │    │  │
//!  ├──────┼──────┼───┤  ───────────────▶  ├────┼────┼──┤
//!  │ blk  │ blk  │   │  x * tw / srcW     │    │    │  │
//!  └──────┴──────┴───┘                    └────┴────┴──┘
//! ```

use image::{Rgb, RgbImage};
use tracing::{debug, warn};

use crate::error::PyramidError;
use crate::source::{ImageSourceReader, SeriesGeometry};

use super::pixel::{decode_block, PixelLayout, NEUTRAL_GRAY};
use super::plan::{PyramidPlan, SourceRect, TileCoord};

/// One block of a source rectangle, relative to the rectangle origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRect {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Partition a `width`x`height` rectangle into blocks of at most
/// `block_size` on each edge, row-major.
pub fn block_grid(width: u32, height: u32, block_size: u32) -> impl Iterator<Item = BlockRect> {
    let block_size = block_size.max(1);
    (0..height).step_by(block_size as usize).flat_map(move |offset_y| {
        (0..width)
            .step_by(block_size as usize)
            .map(move |offset_x| BlockRect {
                offset_x,
                offset_y,
                width: block_size.min(width - offset_x),
                height: block_size.min(height - offset_y),
            })
    })
}

/// A tile buffer with statistics about how it was produced.
#[derive(Debug, Clone)]
pub struct AssembledTile {
    pub coord: TileCoord,
    pub image: RgbImage,
    pub source: SourceRect,
    pub blocks_read: usize,
    pub malformed_blocks: usize,
}

/// Builds tile buffers from a reader with the selected series active.
pub struct RegionAssembler<'a> {
    plan: &'a PyramidPlan,
    layout: PixelLayout,
    block_size: u32,
}

impl<'a> RegionAssembler<'a> {
    pub fn new(plan: &'a PyramidPlan, geometry: &SeriesGeometry, block_size: u32) -> Self {
        Self {
            plan,
            layout: PixelLayout::from_geometry(geometry),
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Assemble the tile at `coord`.
    ///
    /// # Errors
    ///
    /// - `InvalidLevel` / `TileOutOfBounds` if the coordinate is not in the plan
    /// - `SourceRead` if the reader fails on any block; no partial tile is
    ///   returned
    pub async fn assemble<R: ImageSourceReader>(
        &self,
        reader: &mut R,
        coord: TileCoord,
    ) -> Result<AssembledTile, PyramidError> {
        let (tile_width, tile_height) = self.plan.tile_dimensions(coord)?;
        let source = self.plan.source_rect(coord)?;

        let mut sums = TileAccumulator::new(tile_width, tile_height, source.width, source.height);
        let mut blocks_read = 0;
        let mut malformed_blocks = 0;

        for block in block_grid(source.width, source.height, self.block_size) {
            let bytes = reader
                .read_region(
                    source.x + block.offset_x,
                    source.y + block.offset_y,
                    block.width,
                    block.height,
                )
                .await
                .map_err(|e| {
                    warn!(
                        source = reader.identifier(),
                        level = coord.level,
                        tile_x = coord.x,
                        tile_y = coord.y,
                        "Block read failed: {}",
                        e
                    );
                    PyramidError::SourceRead(e)
                })?;
            blocks_read += 1;

            let decoded = decode_block(&bytes, block.width, block.height, &self.layout);
            if let Some(malformed) = decoded.malformed {
                malformed_blocks += 1;
                warn!(
                    source = reader.identifier(),
                    level = coord.level,
                    tile_x = coord.x,
                    tile_y = coord.y,
                    "{}; substituting neutral gray",
                    malformed
                );
            }

            sums.add_block(&decoded.image, block.offset_x, block.offset_y);
        }
        let image = sums.finish();

        debug!(
            level = coord.level,
            tile_x = coord.x,
            tile_y = coord.y,
            blocks = blocks_read,
            "Assembled {}x{} tile from {}x{} source region",
            tile_width,
            tile_height,
            source.width,
            source.height
        );

        Ok(AssembledTile {
            coord,
            image,
            source,
            blocks_read,
            malformed_blocks,
        })
    }
}

// =============================================================================
// Tile Accumulator
// =============================================================================

/// Per-pixel running sums for one tile.
///
/// Source pixel `(x, y)` of a `src_width`x`src_height` rectangle lands in
/// tile pixel `(x * width / src_width, y * height / src_height)`. Sums and
/// counts are `u64`, so a single tile pixel can absorb any number of source
/// pixels.
#[derive(Debug, Clone)]
pub struct TileAccumulator {
    width: u32,
    height: u32,
    src_width: u32,
    src_height: u32,
    // r, g, b, count
    cells: Vec<[u64; 4]>,
}

impl TileAccumulator {
    pub fn new(width: u32, height: u32, src_width: u32, src_height: u32) -> Self {
        Self {
            width,
            height,
            src_width,
            src_height,
            cells: vec![[0; 4]; width as usize * height as usize],
        }
    }

    /// Add a decoded block whose origin is `(offset_x, offset_y)` within the
    /// source rectangle. Pixels outside the rectangle are ignored.
    pub fn add_block(&mut self, block: &RgbImage, offset_x: u32, offset_y: u32) {
        let columns: Vec<Option<usize>> = (0..block.width())
            .map(|x| self.column(offset_x as u64 + x as u64))
            .collect();

        for y in 0..block.height() {
            let Some(row) = self.row(offset_y as u64 + y as u64) else {
                continue;
            };
            for (x, column) in columns.iter().enumerate() {
                let Some(column) = *column else {
                    continue;
                };
                let p = block.get_pixel(x as u32, y);
                let cell = &mut self.cells[row * self.width as usize + column];
                cell[0] += p[0] as u64;
                cell[1] += p[1] as u64;
                cell[2] += p[2] as u64;
                cell[3] += 1;
            }
        }
    }

    /// Average every tile pixel. Pixels that received nothing are neutral gray.
    pub fn finish(self) -> RgbImage {
        let width = self.width as usize;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let [r, g, b, count] = self.cells[y as usize * width + x as usize];
            if count == 0 {
                return NEUTRAL_GRAY;
            }
            let avg = |sum: u64| ((sum + count / 2) / count) as u8;
            Rgb([avg(r), avg(g), avg(b)])
        })
    }

    fn column(&self, x: u64) -> Option<usize> {
        map_to_tile(x, self.width, self.src_width)
    }

    fn row(&self, y: u64) -> Option<usize> {
        map_to_tile(y, self.height, self.src_height)
    }
}

/// `floor(offset * dest / src)` without floating point, `None` past the end.
fn map_to_tile(offset: u64, dest: u32, src: u32) -> Option<usize> {
    if offset >= src as u64 {
        return None;
    }
    Some((offset * dest as u64 / src as u64) as usize)
}

// =============================================================================
// Tests
// =============================================================================
