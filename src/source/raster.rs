//! Raster adapter for the reader capability.
//!
//! Serves plain JPEG, PNG and TIFF images as single-series sources through the
//! `image` crate. The opener decodes a file once and hands every reader for
//! it a shared, immutable copy of the samples; readers stay exclusive handles
//! with their own close state. The whole raster lives in memory, so this
//! adapter suits moderately sized inputs; gigapixel containers need a native
//! reader that decodes regions on demand.
//!
//! Decoding runs under the `image` crate's [`Limits`]. An input over the
//! limits fails as [`SourceError::Decode`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageReader, Limits};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{FormatError, SourceError};

use super::detect::{detect_format, SourceFormat};
use super::reader::{ImageSourceReader, SeriesGeometry, SourceOpener};

// =============================================================================
// Raster Opener
// =============================================================================

/// Identifies one version of a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    async fn read(path: &Path) -> Result<Self, SourceError> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// The most recently decoded raster.
struct DecodedRaster {
    stamp: FileStamp,
    identifier: String,
    geometry: SeriesGeometry,
    samples: Arc<[u8]>,
}

/// Opens local raster files.
///
/// Keeps the last decoded file so that the many readers of one job share a
/// single decode. A changed file (size or modification time) is decoded
/// again. Clones share the cache.
#[derive(Clone)]
pub struct RasterOpener {
    limits: Limits,
    last: Arc<Mutex<Option<DecodedRaster>>>,
    decodes: Arc<AtomicUsize>,
}

impl Default for RasterOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterOpener {
    /// An opener using the `image` crate's default decoding limits.
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            limits,
            last: Arc::new(Mutex::new(None)),
            decodes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reject rasters wider or taller than `max` pixels.
    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.limits.max_image_width = Some(max);
        self.limits.max_image_height = Some(max);
        self
    }

    /// Number of full decodes performed so far.
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceOpener for RasterOpener {
    type Reader = RasterReader;

    async fn detect(&self, path: &Path) -> Result<SourceFormat, FormatError> {
        detect_format(path).await
    }

    async fn open(&self, path: &Path) -> Result<Self::Reader, SourceError> {
        let stamp = FileStamp::read(path).await?;

        // Held across the decode so concurrent opens of one file wait for it
        let mut last = self.last.lock().await;
        if let Some(decoded) = last.as_ref().filter(|d| d.stamp == stamp) {
            return Ok(RasterReader::shared(
                decoded.identifier.clone(),
                decoded.geometry,
                Arc::clone(&decoded.samples),
            ));
        }

        let owned = path.to_path_buf();
        let limits = self.limits.clone();
        let reader = tokio::task::spawn_blocking(move || RasterReader::open(&owned, limits))
            .await
            .map_err(|e| SourceError::Io(e.to_string()))??;
        self.decodes.fetch_add(1, Ordering::SeqCst);

        *last = reader.samples().map(|samples| DecodedRaster {
            stamp,
            identifier: reader.identifier.clone(),
            geometry: reader.geometry,
            samples,
        });
        Ok(reader)
    }
}

// =============================================================================
// Raster Reader
// =============================================================================

/// A decoded raster held in memory as interleaved samples.
pub struct RasterReader {
    identifier: String,
    geometry: SeriesGeometry,
    data: Option<Arc<[u8]>>,
}

impl RasterReader {
    /// Decode a raster file, failing with `Decode` when it exceeds `limits`.
    pub fn open(path: &Path, limits: Limits) -> Result<Self, SourceError> {
        let mut reader = ImageReader::open(path)?.with_guessed_format()?;
        reader.limits(limits);
        let image = reader
            .decode()
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        debug!(
            source = %path.display(),
            width = image.width(),
            height = image.height(),
            "Decoded raster source"
        );

        Ok(Self::from_image(path.display().to_string(), image))
    }

    /// Wrap an already decoded image.
    pub fn from_image(identifier: impl Into<String>, image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());

        let (channels, bits, image) = match image {
            DynamicImage::ImageLuma8(_) => (1, 8, image),
            DynamicImage::ImageLumaA8(_) => (2, 8, image),
            DynamicImage::ImageRgb8(_) => (3, 8, image),
            DynamicImage::ImageRgba8(_) => (4, 8, image),
            DynamicImage::ImageLuma16(_) => (1, 16, image),
            DynamicImage::ImageLumaA16(_) => (2, 16, image),
            DynamicImage::ImageRgb16(_) => (3, 16, image),
            DynamicImage::ImageRgba16(_) => (4, 16, image),
            other => (3, 8, DynamicImage::ImageRgb8(other.to_rgb8())),
        };

        let geometry = SeriesGeometry::new(width, height, channels)
            .with_bits_per_sample(bits)
            .with_little_endian(cfg!(target_endian = "little"));

        Self::shared(identifier, geometry, Arc::from(image.into_bytes()))
    }

    fn shared(identifier: impl Into<String>, geometry: SeriesGeometry, samples: Arc<[u8]>) -> Self {
        Self {
            identifier: identifier.into(),
            geometry,
            data: Some(samples),
        }
    }

    fn samples(&self) -> Option<Arc<[u8]>> {
        self.data.clone()
    }

    pub fn geometry(&self) -> SeriesGeometry {
        self.geometry
    }
}

#[async_trait]
impl ImageSourceReader for RasterReader {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn series_count(&self) -> usize {
        1
    }

    fn series_geometry(&self, index: usize) -> Result<SeriesGeometry, SourceError> {
        if index != 0 {
            return Err(SourceError::SeriesOutOfRange { index, count: 1 });
        }
        Ok(self.geometry)
    }

    fn select_series(&mut self, index: usize) -> Result<(), SourceError> {
        self.series_geometry(index).map(|_| ())
    }

    async fn read_region(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Bytes, SourceError> {
        let geometry = self.geometry;
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| SourceError::Closed(self.identifier.clone()))?;

        let in_bounds = x as u64 + width as u64 <= geometry.width as u64
            && y as u64 + height as u64 <= geometry.height as u64;
        if !in_bounds {
            return Err(SourceError::RegionOutOfBounds {
                x,
                y,
                width,
                height,
                image_width: geometry.width,
                image_height: geometry.height,
            });
        }

        let pixel_bytes = geometry.channels as usize * geometry.bytes_per_sample();
        let stride = geometry.width as usize * pixel_bytes;
        let row_len = width as usize * pixel_bytes;

        let mut out = Vec::with_capacity(geometry.region_len(width, height));
        for row in y as usize..(y + height) as usize {
            let start = row * stride + x as usize * pixel_bytes;
            out.extend_from_slice(&data[start..start + row_len]);
        }

        Ok(Bytes::from(out))
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.data = None;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
