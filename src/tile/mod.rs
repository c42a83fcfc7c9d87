//! Tile encoding and output.
//!
//! # Components
//!
//! - [`JpegTileEncoder`]: RGB buffer to JPEG at a fixed quality
//! - [`TileWriter`]: writes encoded tiles to
//!   `{output_base}/{image_id}/{level}/tile_{x}_{y}.jpg`
//! - [`tile_path`]: the same layout as a pure function, for tile servers
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use wsi_tiler::pyramid::TileCoord;
//! use wsi_tiler::tile::tile_path;
//!
//! let path = tile_path(Path::new("tiles"), "42", TileCoord::new(2, 3, 1));
//! assert!(path.ends_with("42/2/tile_3_1.jpg"));
//! ```

mod encoder;
mod writer;

pub use encoder::{
    clamp_quality, is_valid_quality, JpegTileEncoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use writer::{tile_file_name, tile_path, validate_image_id, TileWriter, TILE_EXTENSION};
