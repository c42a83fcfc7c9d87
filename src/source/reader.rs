//! Reader traits for multi-series image sources.
//!
//! A reader handle is not safe for concurrent use on the same underlying
//! file. Every unit of work (a whole job or a single tile) opens its own
//! handle through a [`SourceOpener`], holds it exclusively inside an
//! [`OpenReader`], and the guard releases it when dropped. Drop runs on
//! panics and on aborted tasks too.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

use crate::error::{FormatError, SourceError};

use super::detect::SourceFormat;

// =============================================================================
// Series Geometry
// =============================================================================

/// Geometry and sample layout of one embedded series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeriesGeometry {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Samples per pixel
    pub channels: u32,

    /// Bits per sample (8, 16, ...)
    pub bits_per_sample: u32,

    /// Channel samples grouped per pixel (true) or per plane (false)
    pub interleaved: bool,

    /// Byte order of multi-byte samples
    pub little_endian: bool,
}

impl SeriesGeometry {
    /// 8-bit interleaved geometry, the common case.
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
            bits_per_sample: 8,
            interleaved: true,
            little_endian: true,
        }
    }

    pub fn with_bits_per_sample(mut self, bits: u32) -> Self {
        self.bits_per_sample = bits;
        self
    }

    pub fn with_interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }

    pub fn with_little_endian(mut self, little_endian: bool) -> Self {
        self.little_endian = little_endian;
        self
    }

    /// Bytes per sample, at least one.
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8).max(1)
    }

    /// Total pixel count.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Bytes a reader should return for a `width`x`height` region.
    pub fn region_len(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.channels as usize * self.bytes_per_sample()
    }
}

// =============================================================================
// Reader Traits
// =============================================================================

/// An opened image source.
///
/// Mirrors the capability of a Bio-Formats-style native decoder: report the
/// series in the container, select one, and return raw bytes for an arbitrary
/// rectangle of the selected series.
#[async_trait]
pub trait ImageSourceReader: Send {
    /// Identifier for logging (typically the source path).
    fn identifier(&self) -> &str;

    /// Number of embedded series.
    fn series_count(&self) -> usize;

    /// Geometry of a series.
    fn series_geometry(&self, index: usize) -> Result<SeriesGeometry, SourceError>;

    /// Make `index` the series subsequent reads apply to.
    fn select_series(&mut self, index: usize) -> Result<(), SourceError>;

    /// Read raw sample bytes for a rectangle of the selected series.
    ///
    /// The returned buffer is expected to hold
    /// [`SeriesGeometry::region_len`] bytes but decoders may return fewer;
    /// callers must not index it blindly.
    async fn read_region(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Bytes, SourceError>;

    /// Release the underlying handle.
    fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Creates readers for source paths.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    /// The reader type this opener produces.
    type Reader: ImageSourceReader + 'static;

    /// Identify the container format without opening a full reader.
    ///
    /// Returns `FormatError::UnsupportedFormat` for unrecognized sources.
    async fn detect(&self, path: &Path) -> Result<SourceFormat, FormatError>;

    /// Open a new, exclusively owned reader.
    async fn open(&self, path: &Path) -> Result<Self::Reader, SourceError>;
}

/// Collect the geometry of every series in index order.
pub fn read_series<R: ImageSourceReader>(reader: &R) -> Result<Vec<SeriesGeometry>, SourceError> {
    (0..reader.series_count())
        .map(|index| reader.series_geometry(index))
        .collect()
}

/// Close a reader, logging rather than propagating a close failure.
pub fn release<R: ImageSourceReader>(reader: &mut R) {
    if let Err(e) = reader.close() {
        warn!(source = reader.identifier(), "Failed to close reader: {}", e);
    }
}

// =============================================================================
// Open Reader Guard
// =============================================================================

/// Owns an opened reader and releases it on drop.
pub struct OpenReader<R: ImageSourceReader> {
    reader: R,
}

impl<R: ImageSourceReader> OpenReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: ImageSourceReader> Deref for OpenReader<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.reader
    }
}

impl<R: ImageSourceReader> DerefMut for OpenReader<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

impl<R: ImageSourceReader> Drop for OpenReader<R> {
    fn drop(&mut self) {
        release(&mut self.reader);
    }
}

// =============================================================================
// Tests
// =============================================================================
