//! Selection of the series that represents the full-resolution slide.
//!
//! Slide containers embed several series: the full slide, thumbnails, label
//! and macro images, sometimes single-channel masks. The first RGB series
//! larger than [`MIN_SLIDE_DIMENSION`] in both directions is taken as the
//! slide. Otherwise the series with the largest area wins.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::PyramidError;
use crate::source::{read_series, ImageSourceReader, SeriesGeometry};

/// Channel count of an RGB slide series.
pub const RGB_CHANNELS: u32 = 3;

/// Width and height must both exceed this for the RGB rule to match.
pub const MIN_SLIDE_DIMENSION: u32 = 1000;

/// Why a series was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SelectionRule {
    /// First large RGB series
    RgbSlide,
    /// No RGB slide found; largest area
    LargestArea,
}

/// The series chosen for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectedSeries {
    pub index: usize,
    pub geometry: SeriesGeometry,
    pub rule: SelectionRule,
}

/// Pick a series index from descriptors in container order.
pub fn select_series(series: &[SeriesGeometry]) -> Result<(usize, SelectionRule), PyramidError> {
    if series.is_empty() {
        return Err(PyramidError::Configuration(
            "source contains no series to select".to_string(),
        ));
    }

    if let Some(index) = series.iter().position(|s| {
        s.channels == RGB_CHANNELS && s.width > MIN_SLIDE_DIMENSION && s.height > MIN_SLIDE_DIMENSION
    }) {
        return Ok((index, SelectionRule::RgbSlide));
    }

    // Strict comparison keeps the lowest index on ties.
    let mut best = 0;
    let mut best_area = 0u64;
    for (index, s) in series.iter().enumerate() {
        if s.area() > best_area {
            best_area = s.area();
            best = index;
        }
    }

    Ok((best, SelectionRule::LargestArea))
}

/// Run selection against an open reader and select the winning series on it.
pub fn select_from_reader<R: ImageSourceReader>(
    reader: &mut R,
) -> Result<SelectedSeries, PyramidError> {
    let series = read_series(reader)?;
    for (index, s) in series.iter().enumerate() {
        debug!(
            source = reader.identifier(),
            series = index,
            channels = s.channels,
            width = s.width,
            height = s.height,
            "Series analysis"
        );
    }

    let (index, rule) = select_series(&series)?;
    reader.select_series(index)?;

    let geometry = series[index];
    info!(
        source = reader.identifier(),
        series = index,
        rule = ?rule,
        "Selected series {}x{} with {} channel(s)",
        geometry.width,
        geometry.height,
        geometry.channels
    );

    Ok(SelectedSeries {
        index,
        geometry,
        rule,
    })
}

// =============================================================================
// Tests
// =============================================================================
