//! Image source abstraction.
//!
//! Pixel decoding of microscopy containers is delegated to an external reader
//! capability. This module defines the seam the generator consumes and a
//! built-in adapter for plain rasters.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           PyramidGenerator              │
//! └────────────────────┬────────────────────┘
//!                      │ open / detect
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          SourceOpener Trait             │
//! │  (one exclusive reader per unit of work)│
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        ImageSourceReader Trait          │
//! │  (series geometry, region reads, close) │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │  RasterReader   │    │ native decoders     │
//! │ (JPEG/PNG/TIFF) │    │ (external)          │
//! └─────────────────┘    └─────────────────────┘
//! ```

pub mod detect;
mod raster;
mod reader;

pub use detect::{detect_format, detect_from_header, SourceFormat};
pub use raster::{RasterOpener, RasterReader};
pub use reader::{
    read_series, ImageSourceReader, OpenReader, SeriesGeometry, SourceOpener,
};
