//! Tile persistence.
//!
//! Output layout, one directory per image and level:
//!
//! ```text
//! {output_base}/
//! └── {image_id}/
//!     ├── 0/
//!     │   └── tile_0_0.jpg
//!     ├── 1/
//!     │   ├── tile_0_0.jpg
//!     │   └── tile_1_0.jpg
//!     └── ...
//! ```
//!
//! Writing the same tile twice overwrites it in place.

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::debug;

use crate::error::PyramidError;
use crate::pyramid::TileCoord;

use super::encoder::JpegTileEncoder;

/// Extension of written tiles.
pub const TILE_EXTENSION: &str = "jpg";

/// File name of a tile within its level directory.
pub fn tile_file_name(x: u32, y: u32) -> String {
    format!("tile_{}_{}.{}", x, y, TILE_EXTENSION)
}

/// Full path of a tile under `output_base`.
pub fn tile_path(output_base: &Path, image_id: &str, coord: TileCoord) -> PathBuf {
    output_base
        .join(image_id)
        .join(coord.level.to_string())
        .join(tile_file_name(coord.x, coord.y))
}

/// Check that an image id is usable as a single directory name.
pub fn validate_image_id(image_id: &str) -> Result<(), PyramidError> {
    let valid = !image_id.is_empty()
        && image_id != "."
        && image_id != ".."
        && !image_id.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(PyramidError::InvalidImageId {
            image_id: image_id.to_string(),
        })
    }
}

// =============================================================================
// Tile Writer
// =============================================================================

/// Encodes tile buffers and writes them to the output hierarchy.
#[derive(Debug, Clone)]
pub struct TileWriter {
    output_base: PathBuf,
    encoder: JpegTileEncoder,
}

impl TileWriter {
    pub fn new(output_base: impl Into<PathBuf>, encoder: JpegTileEncoder) -> Self {
        Self {
            output_base: output_base.into(),
            encoder,
        }
    }

    pub fn output_base(&self) -> &Path {
        &self.output_base
    }

    pub fn encoder(&self) -> &JpegTileEncoder {
        &self.encoder
    }

    /// Directory holding every tile of `level`.
    pub fn level_dir(&self, image_id: &str, level: u32) -> PathBuf {
        self.output_base.join(image_id).join(level.to_string())
    }

    /// Encode and write one tile, returning its path.
    ///
    /// # Errors
    ///
    /// - `InvalidImageId` if the id is not a single path segment
    /// - `Encode` if JPEG encoding fails
    /// - `TileWrite` if the directory or file cannot be written
    pub async fn write(
        &self,
        image_id: &str,
        coord: TileCoord,
        image: &RgbImage,
    ) -> Result<PathBuf, PyramidError> {
        validate_image_id(image_id)?;

        let encoded = self.encoder.encode(image)?;

        let dir = self.level_dir(image_id, coord.level);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PyramidError::TileWrite {
                path: dir.clone(),
                message: e.to_string(),
            })?;

        let path = dir.join(tile_file_name(coord.x, coord.y));
        tokio::fs::write(&path, &encoded)
            .await
            .map_err(|e| PyramidError::TileWrite {
                path: path.clone(),
                message: e.to_string(),
            })?;

        debug!(
            image_id = image_id,
            level = coord.level,
            tile_x = coord.x,
            tile_y = coord.y,
            bytes = encoded.len(),
            "Wrote tile"
        );

        Ok(path)
    }
}

// =============================================================================
// Tests
// =============================================================================
