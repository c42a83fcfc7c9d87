//! Decoding of raw reader bytes into RGB samples.
//!
//! Readers return samples in one of three arrangements:
//!
//! - **Gray**: one (or two, with alpha) channel; the first sample is
//!   replicated to R=G=B
//! - **Interleaved**: `RGBRGB...`, each pixel's samples adjacent
//! - **Planar**: `RRR...GGG...BBB...`, each channel a contiguous plane of
//!   `width * height * bytes_per_sample` bytes
//!
//! Multi-byte samples are reduced to their most significant byte.
//!
//! Decoders are known to return short buffers for some containers. Any
//! pixel whose samples fall outside the buffer becomes [`NEUTRAL_GRAY`] and
//! the block is reported as malformed; decoding itself never fails.

use image::{Rgb, RgbImage};

use crate::error::MalformedPixelBlockError;
use crate::source::SeriesGeometry;

/// Substitute for pixels the buffer cannot supply.
pub const NEUTRAL_GRAY: Rgb<u8> = Rgb([0x80, 0x80, 0x80]);

/// How channel samples are arranged in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Gray,
    Interleaved,
    Planar,
}

/// Sample layout derived from a series geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub channels: usize,
    pub bytes_per_sample: usize,
    pub layout: ChannelLayout,
    pub interleaved: bool,
    /// Offset of the most significant byte within a sample
    msb_offset: usize,
}

impl PixelLayout {
    pub fn from_geometry(geometry: &SeriesGeometry) -> Self {
        let channels = geometry.channels.max(1) as usize;
        let bytes_per_sample = geometry.bytes_per_sample();

        let layout = if channels < 3 {
            ChannelLayout::Gray
        } else if geometry.interleaved {
            ChannelLayout::Interleaved
        } else {
            ChannelLayout::Planar
        };

        let msb_offset = if geometry.little_endian {
            bytes_per_sample - 1
        } else {
            0
        };

        Self {
            channels,
            bytes_per_sample,
            layout,
            interleaved: geometry.interleaved,
            msb_offset,
        }
    }

    /// Byte length a complete `width`x`height` block occupies.
    pub fn expected_len(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.channels * self.bytes_per_sample
    }

    /// Byte offset of channel `channel` for pixel `index`.
    fn sample_offset(&self, index: usize, channel: usize, plane_len: usize) -> usize {
        let bps = self.bytes_per_sample;
        match self.layout {
            ChannelLayout::Gray if self.interleaved => index * self.channels * bps,
            ChannelLayout::Gray => index * bps,
            ChannelLayout::Interleaved => (index * self.channels + channel) * bps,
            ChannelLayout::Planar => channel * plane_len + index * bps,
        }
    }
}

/// A block decoded to RGB.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    pub image: RgbImage,
    /// Set when the buffer was shorter than the geometry implies
    pub malformed: Option<MalformedPixelBlockError>,
}

/// Decode a `width`x`height` block of raw samples.
pub fn decode_block(bytes: &[u8], width: u32, height: u32, layout: &PixelLayout) -> DecodedBlock {
    let expected = layout.expected_len(width, height);
    let plane_len = width as usize * height as usize * layout.bytes_per_sample;

    let sample = |index: usize, channel: usize| -> Option<u8> {
        let offset = layout.sample_offset(index, channel, plane_len) + layout.msb_offset;
        bytes.get(offset).copied()
    };

    let image = RgbImage::from_fn(width, height, |x, y| {
        let index = y as usize * width as usize + x as usize;
        let rgb = match layout.layout {
            ChannelLayout::Gray => sample(index, 0).map(|v| [v, v, v]),
            ChannelLayout::Interleaved | ChannelLayout::Planar => {
                match (sample(index, 0), sample(index, 1), sample(index, 2)) {
                    (Some(r), Some(g), Some(b)) => Some([r, g, b]),
                    _ => None,
                }
            }
        };
        rgb.map(Rgb).unwrap_or(NEUTRAL_GRAY)
    });

    let malformed = (bytes.len() < expected).then(|| MalformedPixelBlockError {
        width,
        height,
        expected,
        actual: bytes.len(),
    });

    DecodedBlock { image, malformed }
}

// =============================================================================
// Tests
// =============================================================================
