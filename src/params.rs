//! Parameter derivation for the rendering pipeline.
//!
//! Everything here is pure arithmetic over the inputs: sample rate, data
//! length, user settings and screen geometry. A [`Parameters`] value is
//! computed once per build and stays immutable until the next rebuild.
//!
//! The auto-sizing constants (window doubling, overlap ceilings, buckets per
//! pixel) are empirical tunings carried over unchanged; they are exposed as
//! named constants rather than re-derived.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Span;

/// Smallest accepted analysis window, in samples.
pub const MIN_WINDOW_SIZE: usize = 16;
/// Largest accepted analysis window, in samples.
pub const MAX_WINDOW_SIZE: usize = 32_768;
/// Auto-sized windows are rounded to a power of two and then doubled.
const AUTO_WINDOW_DOUBLING: usize = 2;
/// Auto overlap targets at most this many transformed buckets per screen
/// pixel.
const MAX_BUCKETS_PER_PIXEL: f32 = 0.5;
/// Overlap ceiling for the normal auto tier.
const AUTO_OVERLAP_CEILING: f32 = 0.75;
/// Overlap ceiling for the high auto tier.
const AUTO_OVERLAP_CEILING_HIGH: f32 = 0.90;
/// Nominal raw entries per slice; bounds UI update granularity and is
/// deliberately independent of the window size.
const NOMINAL_SLICE_ENTRIES: usize = 32_768;

const MIN_AXIS_SPAN: f32 = 1.0e-6;

/// Analysis window sizing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Fixed window size in samples; must be even and within bounds.
    Explicit(usize),
    /// Size the window from screen geometry.
    Auto,
}

/// Window overlap request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlapMode {
    /// Fixed overlap as a fraction of the window, `0.0..=1.0`.
    Explicit(f32),
    /// Derive overlap from screen geometry, capped at 75% of the window.
    Auto,
    /// Derive overlap from screen geometry, capped at 90% of the window.
    AutoHigh,
}

/// Trigger detection configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSettings {
    pub enabled: bool,
    /// Lower edge of the monitored frequency band, Hz.
    pub band_low_hz: f32,
    /// Upper edge of the monitored frequency band, Hz.
    pub band_high_hz: f32,
    /// Magnitude threshold, dB.
    pub threshold_db: f32,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            band_low_hz: 15_000.0,
            band_high_hz: 96_000.0,
            threshold_db: -45.0,
        }
    }
}

/// Engine-facing render settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub window: WindowMode,
    pub overlap: OverlapMode,
    pub trigger: TriggerSettings,
    /// Upper bound on the data paged in per build, in seconds.
    pub max_page_seconds: f32,
    /// Number of colour steps in the palette lookup table.
    pub palette_size: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            window: WindowMode::Auto,
            overlap: OverlapMode::Auto,
            trigger: TriggerSettings::default(),
            max_page_seconds: 30.0,
            palette_size: 256,
        }
    }
}

/// Canvas size and the portion of each axis currently shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenGeometry {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Fraction of the page duration visible, `(0, 1]`.
    pub visible_time_fraction: f32,
    /// Fraction of the frequency axis visible, `(0, 1]`.
    pub visible_freq_fraction: f32,
}

impl Default for ScreenGeometry {
    fn default() -> Self {
        Self {
            canvas_width: 1024,
            canvas_height: 768,
            visible_time_fraction: 1.0,
            visible_freq_fraction: 1.0,
        }
    }
}

/// Immutable derived parameters, one set per build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameters {
    pub sample_rate: u32,
    /// Total samples the source can address (page-independent).
    pub total_samples: u64,
    /// Absolute sample index where the current page begins.
    pub page_start: u64,
    /// Samples paged in for this build.
    pub paged_len: usize,
    /// Largest page the settings allow, in samples.
    pub page_capacity: usize,
    /// Analysis window size W, samples. Even, positive, bounded.
    pub window_size: usize,
    /// Window overlap, samples.
    pub overlap: usize,
    /// Distance between window starts: `clamp(W - overlap, 1, W)`.
    pub stride: usize,
    /// `W/2 + 1`, spanning 0..Nyquist inclusive.
    pub freq_buckets: usize,
    /// Full windows fitting the page: `(paged_len - W)/S + 1`, 0 if short.
    pub time_buckets: usize,
    /// Windows produced per slice.
    pub slice_time_buckets: usize,
    /// Raw entries spanned by one slice: `(slice_time_buckets-1)*S + W`.
    pub raw_slice_entries: usize,
    /// Raw entries shared between consecutive slices: `W - S`.
    pub raw_slice_overlap: usize,
}

impl Parameters {
    /// Derive a parameter set. Pure; fails only on invalid (non-positive or
    /// out-of-bounds) configuration.
    pub fn derive(
        settings: &RenderSettings,
        geometry: &ScreenGeometry,
        sample_rate: u32,
        total_samples: u64,
        page_start: u64,
    ) -> PipelineResult<Self> {
        if sample_rate == 0 {
            return Err(PipelineError::InvalidConfig(
                "sample rate must be positive".into(),
            ));
        }
        if geometry.canvas_width == 0 || geometry.canvas_height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "canvas {}x{} has a zero dimension",
                geometry.canvas_width, geometry.canvas_height
            )));
        }
        if !(settings.max_page_seconds > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "max page duration must be positive".into(),
            ));
        }

        let page_capacity = (settings.max_page_seconds * sample_rate as f32) as usize;
        if page_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "page capacity rounds to zero samples".into(),
            ));
        }
        let remaining = total_samples.saturating_sub(page_start);
        let paged_len = remaining.min(page_capacity as u64) as usize;

        let window_size = match settings.window {
            WindowMode::Explicit(w) => {
                if w == 0 || w % 2 != 0 {
                    return Err(PipelineError::InvalidConfig(format!(
                        "window size {w} must be positive and even"
                    )));
                }
                if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&w) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "window size {w} outside supported range \
                         {MIN_WINDOW_SIZE}..={MAX_WINDOW_SIZE}"
                    )));
                }
                w
            }
            WindowMode::Auto => auto_window_size(sample_rate, geometry, paged_len),
        };

        let overlap = match settings.overlap {
            OverlapMode::Explicit(fraction) => {
                if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "overlap fraction {fraction} outside 0..=1"
                    )));
                }
                (fraction * window_size as f32).round() as usize
            }
            OverlapMode::Auto => {
                auto_overlap(window_size, sample_rate, geometry, paged_len, AUTO_OVERLAP_CEILING)
            }
            OverlapMode::AutoHigh => auto_overlap(
                window_size,
                sample_rate,
                geometry,
                paged_len,
                AUTO_OVERLAP_CEILING_HIGH,
            ),
        };

        let stride = (window_size.saturating_sub(overlap)).clamp(1, window_size);
        let freq_buckets = window_size / 2 + 1;
        let time_buckets = if paged_len < window_size {
            0
        } else {
            (paged_len - window_size) / stride + 1
        };

        let slice_time_buckets = (NOMINAL_SLICE_ENTRIES / stride).max(1);
        let raw_slice_entries = (slice_time_buckets - 1) * stride + window_size;
        let raw_slice_overlap = window_size - stride;

        Ok(Self {
            sample_rate,
            total_samples,
            page_start,
            paged_len,
            page_capacity,
            window_size,
            overlap,
            stride,
            freq_buckets,
            time_buckets,
            slice_time_buckets,
            raw_slice_entries,
            raw_slice_overlap,
        })
    }

    #[inline]
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 * 0.5
    }

    /// Frequency distance between adjacent buckets: `Nyquist / (W/2)`.
    #[inline]
    pub fn freq_spacing(&self) -> f32 {
        self.nyquist() / (self.freq_buckets - 1) as f32
    }

    /// Time distance between adjacent buckets, seconds.
    #[inline]
    pub fn seconds_per_bucket(&self) -> f32 {
        self.stride as f32 / self.sample_rate as f32
    }

    /// Centre time of a time bucket within the page, seconds.
    pub fn time_at_bucket(&self, bucket: usize) -> f32 {
        (bucket * self.stride + self.window_size / 2) as f32 / self.sample_rate as f32
    }

    /// Centre frequency of a frequency bucket, Hz.
    pub fn freq_at_bucket(&self, bucket: usize) -> f32 {
        bucket as f32 * self.freq_spacing()
    }

    /// Duration of the paged data, seconds.
    pub fn paged_duration_secs(&self) -> f32 {
        self.paged_len as f32 / self.sample_rate as f32
    }

    /// Number of slices a full render walks: `ceil(T / slice_T) + 1`, the
    /// final one covering any trailing partial window run.
    pub fn slice_count(&self) -> usize {
        self.time_buckets.div_ceil(self.slice_time_buckets) + 1
    }

    /// Raw entry at which slice `index` begins. Consecutive starts differ by
    /// exactly `raw_slice_entries - raw_slice_overlap`.
    #[inline]
    pub fn slice_start(&self, index: usize) -> usize {
        index * self.slice_time_buckets * self.stride
    }

    /// Frequency buckets covered by `[low_hz, high_hz]`, clamped to the
    /// grid. Empty when the band lies outside 0..Nyquist.
    pub fn bucket_span_for_band(&self, low_hz: f32, high_hz: f32) -> Span {
        if high_hz <= 0.0 || low_hz > self.nyquist() || high_hz < low_hz {
            return Span::empty();
        }
        let spacing = self.freq_spacing();
        let low = (low_hz.max(0.0) / spacing).floor() as usize;
        let high = ((high_hz.min(self.nyquist()) / spacing).ceil() as usize + 1)
            .min(self.freq_buckets);
        Span::new(low.min(high), high)
    }

    /// Paging layout for the full data set under the current page capacity.
    pub fn page_info(&self) -> PageInfo {
        let capacity = self.page_capacity as u64;
        let page_count = self.total_samples.div_ceil(capacity).max(1) as usize;
        let page_index = (self.page_start / capacity) as usize;
        PageInfo {
            page_index,
            page_count,
            page_len: self.paged_len,
        }
    }

    /// One-line build description: duration, rate, window, overlap.
    pub fn summary(&self) -> String {
        let overlap_pct = self.overlap as f32 / self.window_size as f32 * 100.0;
        format!(
            "{:.2} s @ {} Hz, window {}, overlap {:.0}%",
            self.paged_duration_secs(),
            self.sample_rate,
            self.window_size,
            overlap_pct
        )
    }
}

/// Read-only paging derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_index: usize,
    pub page_count: usize,
    pub page_len: usize,
}

/// Target window `W0 = sqrt(rate^2 * aspect_factor)` where the aspect factor
/// relates canvas shape to the axis spans shown; rounded to the nearest
/// power of two, doubled, clamped.
fn auto_window_size(sample_rate: u32, geometry: &ScreenGeometry, paged_len: usize) -> usize {
    let rate = sample_rate as f32;
    let time_span = (paged_len as f32 / rate) * fraction(geometry.visible_time_fraction);
    let freq_span = (rate * 0.5 * fraction(geometry.visible_freq_fraction)).max(MIN_AXIS_SPAN);
    let aspect = geometry.canvas_height as f32 / geometry.canvas_width as f32;
    let factor = aspect * time_span.max(MIN_AXIS_SPAN) / freq_span;
    let target = (rate * rate * factor).sqrt();
    (nearest_power_of_two(target) * AUTO_WINDOW_DOUBLING).clamp(MIN_WINDOW_SIZE, MAX_WINDOW_SIZE)
}

/// Overlap leaving no more than `MAX_BUCKETS_PER_PIXEL` buckets per screen
/// pixel, capped by the requested tier ceiling.
fn auto_overlap(
    window: usize,
    sample_rate: u32,
    geometry: &ScreenGeometry,
    paged_len: usize,
    ceiling: f32,
) -> usize {
    let rate = sample_rate as f32;
    let time_span = (paged_len as f32 / rate) * fraction(geometry.visible_time_fraction);
    let px_per_sec = geometry.canvas_width as f32 / time_span.max(MIN_AXIS_SPAN);
    let window_px = window as f32 / rate * px_per_sec;
    let min_stride_px = 1.0 / MAX_BUCKETS_PER_PIXEL;
    let fraction = (1.0 - min_stride_px / window_px).clamp(0.0, ceiling);
    ((fraction * window as f32).round() as usize).clamp(1, window)
}

#[inline]
fn fraction(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(MIN_AXIS_SPAN, 1.0)
    } else {
        1.0
    }
}

fn nearest_power_of_two(target: f32) -> usize {
    if !target.is_finite() || target <= 1.0 {
        return 1;
    }
    let exponent = target.log2().round().clamp(0.0, 30.0) as u32;
    1usize << exponent
}
