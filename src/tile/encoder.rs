//! JPEG tile encoder.
//!
//! Tiles are always written as 8-bit RGB JPEG. Quality is fixed per encoder
//! and clamped into `1..=100` at construction.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, RgbImage};

use crate::error::PyramidError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// JPEG Encoder
// =============================================================================

/// Encodes assembled tile buffers as JPEG.
///
/// Encoding is deterministic: the same buffer and quality always produce the
/// same bytes, which is what makes single-tile regeneration idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegTileEncoder {
    quality: u8,
}

impl Default for JpegTileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl JpegTileEncoder {
    /// Create an encoder; out-of-range qualities are clamped.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode an RGB buffer.
    ///
    /// # Errors
    ///
    /// Returns `PyramidError::Encode` if the buffer is empty or the encoder
    /// rejects it.
    pub fn encode(&self, image: &RgbImage) -> Result<Bytes, PyramidError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PyramidError::Encode {
                message: format!("empty tile buffer {}x{}", image.width(), image.height()),
            });
        }

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);

        encoder
            .encode_image(image)
            .map_err(|e| PyramidError::Encode {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }

    /// Read the dimensions of an encoded tile without decoding its pixels.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), PyramidError> {
        let reader = ImageReader::with_format(Cursor::new(source), image::ImageFormat::Jpeg);

        reader.into_dimensions().map_err(|e| PyramidError::Encode {
            message: e.to_string(),
        })
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
