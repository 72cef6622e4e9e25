//! Brightness and contrast mapping from the dB grid onto the colour image.
//!
//! The BnC range is a logical `[0, 1]` pair over the supported dB span.
//! From it the stage derives an `(offset, multiplier)` pair so the per-cell
//! work is one multiply and a clamp into the palette. Changing BnC only
//! requires repainting here; the transformed grid is reused untouched.

use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::output::{FrameImage, ImageKind, PipelineEvent, SharedOutput};
use crate::palette::Palette;
use crate::params::Parameters;
use crate::pipeline::Span;
use crate::pipeline::buffers::SpectralGrid;
use crate::util::{DB_SPAN_MIN, db_span_width};

/// Smallest dB distance the two range ends may be apart.
const MIN_RANGE_DB: f32 = 1.0e-3;

/// Logical brightness/contrast range, both ends in `[0, 1]` over the
/// supported dB span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BncRange {
    pub low: f32,
    pub high: f32,
}

impl BncRange {
    pub fn new(low: f32, high: f32) -> Self {
        let low = low.clamp(0.0, 1.0);
        let high = high.clamp(0.0, 1.0);
        Self {
            low: low.min(high),
            high: high.max(low),
        }
    }

    /// The whole supported span.
    pub fn full() -> Self {
        Self {
            low: 0.0,
            high: 1.0,
        }
    }
}

impl Default for BncRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Map a logical `[0, 1]` position onto the supported dB span.
#[inline]
pub fn logical_to_db(logical: f32) -> f32 {
    DB_SPAN_MIN + logical.clamp(0.0, 1.0) * db_span_width()
}

/// Inverse of [`logical_to_db`], clamped into `[0, 1]`.
#[inline]
pub fn db_to_logical(db: f32) -> f32 {
    ((db - DB_SPAN_MIN) / db_span_width()).clamp(0.0, 1.0)
}

fn mapping(range: BncRange, palette_size: usize) -> (f32, f32) {
    let low_db = logical_to_db(range.low);
    let high_db = logical_to_db(range.high);
    let span = (high_db - low_db).max(MIN_RANGE_DB);
    (low_db, palette_size as f32 / span)
}

pub struct ColourMapStage {
    chunk_time_buckets: usize,
    palette: Palette,
    range: BncRange,
    offset_db: f32,
    multiplier: f32,
    output: Arc<SharedOutput>,
}

impl ColourMapStage {
    pub fn new(
        params: &Parameters,
        palette_size: usize,
        output: Arc<SharedOutput>,
    ) -> PipelineResult<Self> {
        if palette_size < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "palette size {palette_size} too small, need at least 2"
            )));
        }
        let palette = Palette::with_default_gradient(palette_size);
        output.colour().replace(FrameImage::new(
            params.time_buckets,
            params.freq_buckets,
            palette.colour(0),
        ));

        let range = BncRange::default();
        let (offset_db, multiplier) = mapping(range, palette.size());
        Ok(Self {
            chunk_time_buckets: params.slice_time_buckets,
            palette,
            range,
            offset_db,
            multiplier,
            output,
        })
    }

    pub fn range(&self) -> BncRange {
        self.range
    }

    pub fn set_range(&mut self, range: BncRange) {
        self.range = BncRange::new(range.low, range.high);
        let (offset_db, multiplier) = mapping(self.range, self.palette.size());
        self.offset_db = offset_db;
        self.multiplier = multiplier;
    }

    /// Paint the given transformed rows, clipped to what the grid holds.
    pub fn slice_render(&self, grid: &SpectralGrid, times: Span) {
        let times = times.intersect(grid.populated());
        if times.is_empty() {
            return;
        }
        let palette_max = self.palette.size() as f32;
        self.output.colour().update(|image| {
            for t in times.as_range() {
                for (f, &intensity) in grid.row(t).iter().enumerate() {
                    let index =
                        ((intensity - self.offset_db) * self.multiplier).clamp(0.0, palette_max);
                    image.put(t, f, self.palette.colour(index as usize));
                }
            }
        });
        self.output.publish(PipelineEvent::Redraw(ImageKind::Colour));
    }

    /// Repaint everything populated, in slice-sized chunks so no single
    /// pass holds the image lock for the whole grid.
    pub fn full_render(&self, grid: &SpectralGrid) {
        let populated = grid.populated();
        let mut start = populated.start;
        while start < populated.end {
            let end = (start + self.chunk_time_buckets).min(populated.end);
            self.slice_render(grid, Span::new(start, end));
            start = end;
        }
    }

    /// Blank the colour image back to the palette floor.
    pub fn reset(&self) {
        let floor = self.palette.colour(0);
        self.output.colour().update(|image| image.fill(floor));
        self.output.publish(PipelineEvent::Redraw(ImageKind::Colour));
    }
}
