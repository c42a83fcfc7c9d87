use std::path::PathBuf;

use thiserror::Error;

use crate::job::JobStatus;

/// Errors raised by an image source reader while opening or streaming pixels.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Underlying file or device error
    #[error("I/O error: {0}")]
    Io(String),

    /// Source file does not exist
    #[error("Source not found: {0}")]
    NotFound(String),

    /// The decoder could not produce pixels for the requested data
    #[error("Decode error: {0}")]
    Decode(String),

    /// Series index beyond what the container holds
    #[error("Series {index} out of range: source has {count} series")]
    SeriesOutOfRange { index: usize, count: usize },

    /// Requested rectangle extends past the selected series
    #[error(
        "Region out of bounds: {width}x{height} at ({x}, {y}) exceeds {image_width}x{image_height}"
    )]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// Reader was used after `close`
    #[error("Reader already closed: {0}")]
    Closed(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(err.to_string()),
            _ => SourceError::Io(err.to_string()),
        }
    }
}

/// Errors related to source format detection
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file header
    #[error("I/O error: {0}")]
    Io(#[from] SourceError),

    /// Container or extension not recognized by the reader capability
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// A decoded block carried fewer bytes than its geometry implies.
///
/// Never propagated: the affected pixels are replaced with neutral gray and
/// the block is counted in the job report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed pixel block: {width}x{height} needs {expected} bytes, got {actual}")]
pub struct MalformedPixelBlockError {
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

/// Errors from the catalog service that owns image records
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Image not found in catalog: {0}")]
    NotFound(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// The status change skips or reverses a lifecycle step
    #[error(
        "Status of {image_id} cannot move from {} to {to}",
        .from.map_or("NONE", |s| s.as_str())
    )]
    InvalidTransition {
        image_id: String,
        from: Option<JobStatus>,
        to: JobStatus,
    },
}

/// Errors that can occur while generating a tile pyramid
#[derive(Debug, Clone, Error)]
pub enum PyramidError {
    /// Source container is not recognized; the job never leaves PENDING
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// No usable series, or invalid plan parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The reader failed to open the source or stream a block
    #[error("Source read error: {0}")]
    SourceRead(#[from] SourceError),

    /// Tile could not be encoded
    #[error("Tile encode error: {message}")]
    Encode { message: String },

    /// Tile could not be persisted
    #[error("Failed to write tile {}: {message}", path.display())]
    TileWrite { path: PathBuf, message: String },

    /// Status update or notification failed
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Requested level is beyond the plan
    #[error("Invalid level {level}: pyramid has levels 0..={max_level}")]
    InvalidLevel { level: u32, max_level: u32 },

    /// Requested tile is outside the level's grid
    #[error("Tile ({x}, {y}) out of bounds at level {level}: grid is {max_x}x{max_y}")]
    TileOutOfBounds {
        level: u32,
        x: u32,
        y: u32,
        max_x: u32,
        max_y: u32,
    },

    /// Image id cannot be used as a directory name
    #[error("Invalid image id: {image_id:?}")]
    InvalidImageId { image_id: String },

    /// A generation for this image is already in flight
    #[error("Generation already running for image {image_id}")]
    JobAlreadyRunning { image_id: String },

    /// A tile worker task panicked or was aborted
    #[error("Tile worker failed: {message}")]
    Worker { message: String },
}

impl From<FormatError> for PyramidError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io(source) => PyramidError::SourceRead(source),
            FormatError::UnsupportedFormat { reason } => PyramidError::UnsupportedFormat { reason },
        }
    }
}

impl PyramidError {
    /// Whether this error is raised before a job enters PROCESSING.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            PyramidError::UnsupportedFormat { .. }
                | PyramidError::InvalidImageId { .. }
                | PyramidError::JobAlreadyRunning { .. }
        )
    }
}
