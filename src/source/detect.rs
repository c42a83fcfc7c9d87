//! Format detection for raster sources.
//!
//! This module identifies source files by their magic bytes. Currently
//! recognized:
//!
//! - **JPEG**: `FF D8 FF`
//! - **PNG**: the 8-byte PNG signature
//! - **TIFF / BigTIFF**: `II` or `MM` byte order mark followed by version 42 or 43
//!
//! Anything else is rejected before a job starts processing.

use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::error::{FormatError, SourceError};

// =============================================================================
// SourceFormat
// =============================================================================

/// Detected source container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceFormat {
    Jpeg,
    Png,
    /// Classic TIFF (version 42)
    Tiff,
    /// BigTIFF (version 43)
    BigTiff,
}

impl SourceFormat {
    /// Get a human-readable name for the format.
    pub const fn name(&self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "JPEG",
            SourceFormat::Png => "PNG",
            SourceFormat::Tiff => "TIFF",
            SourceFormat::BigTiff => "BigTIFF",
        }
    }
}

// =============================================================================
// Format Detection
// =============================================================================

/// Bytes read from the start of a file for detection.
const HEADER_BYTES: usize = 16;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Detect the format of a source file from its header.
///
/// # Returns
/// * `Ok(SourceFormat)` - The detected format
/// * `Err(FormatError::UnsupportedFormat)` - Header is not recognized
/// * `Err(FormatError::Io)` - The file could not be read
pub async fn detect_format(path: &Path) -> Result<SourceFormat, FormatError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(SourceError::from)?;

    let mut header = Vec::with_capacity(HEADER_BYTES);
    (&mut file)
        .take(HEADER_BYTES as u64)
        .read_to_end(&mut header)
        .await
        .map_err(SourceError::from)?;

    detect_from_header(&header).ok_or_else(|| FormatError::UnsupportedFormat {
        reason: format!("{} is not a JPEG, PNG or TIFF image", path.display()),
    })
}

/// Identify a format from the leading bytes of a file.
pub fn detect_from_header(bytes: &[u8]) -> Option<SourceFormat> {
    if bytes.starts_with(JPEG_MAGIC) {
        return Some(SourceFormat::Jpeg);
    }
    if bytes.starts_with(PNG_MAGIC) {
        return Some(SourceFormat::Png);
    }
    tiff_version(bytes).and_then(|version| match version {
        42 => Some(SourceFormat::Tiff),
        43 => Some(SourceFormat::BigTiff),
        _ => None,
    })
}

/// Read the TIFF version field if the byte order mark is valid.
fn tiff_version(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 4 {
        return None;
    }
    match &bytes[0..2] {
        b"II" => Some(u16::from_le_bytes([bytes[2], bytes[3]])),
        b"MM" => Some(u16::from_be_bytes([bytes[2], bytes[3]])),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
