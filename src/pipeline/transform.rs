//! Windowed FFT transform stage.
//!
//! Turns raw slice samples into dB magnitude rows of the spectral grid, and
//! keeps the amplitude envelope, cursor marker and trigger detection in step
//! with what was actually transformed. The FFT plan and all scratch storage
//! are sized to the window fixed at construction; a slice call quoting a
//! different window size is a contract violation, not a recoverable state.

use parking_lot::RwLock;
use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use rustc_hash::FxHashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{PipelineError, PipelineResult};
use crate::output::{FrameImage, ImageKind, PipelineEvent, SharedOutput};
use crate::params::{Parameters, TriggerSettings};
use crate::pipeline::buffers::{RawPageBuffer, SpectralGrid};
use crate::pipeline::colour::ColourMapStage;
use crate::pipeline::{SliceOutcome, Span, TriggerMark};
use crate::util::{SAMPLE_SCALE, power_to_db};

/// Sentinel kept one entry past the unwrap scratch; in-bounds window writes
/// never reach it.
const SCRATCH_GUARD: f32 = -1.0;

/// Envelope image background, matching the UI base tone.
const ENVELOPE_BACKGROUND: u32 = 0xFF0F_1012;
const ENVELOPE_FOREGROUND: u32 = 0xFFE6_E8EC;

struct WindowCache {
    entries: RwLock<FxHashMap<usize, Arc<[f32]>>>,
}

impl WindowCache {
    fn global() -> &'static WindowCache {
        static INSTANCE: OnceLock<WindowCache> = OnceLock::new();
        INSTANCE.get_or_init(|| WindowCache {
            entries: RwLock::new(FxHashMap::default()),
        })
    }

    fn get(&self, len: usize) -> Arc<[f32]> {
        if let Some(existing) = self.entries.read().get(&len) {
            return Arc::clone(existing);
        }
        let mut write = self.entries.write();
        Arc::clone(
            write
                .entry(len)
                .or_insert_with(|| Arc::from(hann_coefficients(len))),
        )
    }
}

/// Symmetric Hann taper: zero at both edges, unity at the centre.
fn hann_coefficients(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f32;
    (0..len)
        .map(|n| 0.5 * (1.0 - (core::f32::consts::TAU * n as f32 / denom).cos()))
        .collect()
}

pub struct TransformStage {
    params: Parameters,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Arc<[f32]>,
    grid: SpectralGrid,
    unwrap_scratch: Vec<f32>,
    real_buffer: Vec<f32>,
    spectrum_buffer: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
    /// Power normalisation `(2/W)^2` folded into each bin before the dB
    /// conversion.
    normalization: f32,
    trigger_enabled: bool,
    trigger_band: Span,
    trigger_threshold_db: f32,
    output: Arc<SharedOutput>,
}

impl TransformStage {
    pub fn new(
        params: Parameters,
        trigger: TriggerSettings,
        envelope_height: usize,
        output: Arc<SharedOutput>,
    ) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(params.window_size);
        let window = WindowCache::global().get(params.window_size);
        let grid = SpectralGrid::new(params.time_buckets, params.freq_buckets);

        let scratch_len = params.slice_time_buckets * params.window_size;
        let mut unwrap_scratch = vec![0.0; scratch_len + 1];
        unwrap_scratch[scratch_len] = SCRATCH_GUARD;

        let real_buffer = vec![0.0; params.window_size];
        let spectrum_buffer = fft.make_output_vec();
        let fft_scratch = fft.make_scratch_vec();
        let bin_scale = 2.0 / params.window_size as f32;

        let trigger_band = params.bucket_span_for_band(trigger.band_low_hz, trigger.band_high_hz);

        output.envelope().replace(FrameImage::new(
            params.time_buckets,
            envelope_height.max(1),
            ENVELOPE_BACKGROUND,
        ));
        output.set_cursor_time(0.0);

        Self {
            params,
            fft,
            window,
            grid,
            unwrap_scratch,
            real_buffer,
            spectrum_buffer,
            fft_scratch,
            normalization: bin_scale * bin_scale,
            trigger_enabled: trigger.enabled && !trigger_band.is_empty(),
            trigger_band,
            trigger_threshold_db: trigger.threshold_db,
            output,
        }
    }

    pub fn grid(&self) -> &SpectralGrid {
        &self.grid
    }

    /// Time buckets transformed so far.
    pub fn populated(&self) -> Span {
        self.grid.populated()
    }

    /// Transform every full window inside `raw_span` into grid rows starting
    /// at `transformed_offset`, then hand the produced range to the colour
    /// stage. `window_size` must equal the size fixed at construction.
    pub fn slice_render(
        &mut self,
        raw: &RawPageBuffer,
        raw_span: Span,
        transformed_offset: usize,
        window_size: usize,
        colour: &ColourMapStage,
    ) -> PipelineResult<SliceOutcome> {
        if window_size != self.params.window_size {
            return Err(PipelineError::WindowMismatch {
                expected: self.params.window_size,
                actual: window_size,
            });
        }

        let count = self.window_count(raw_span, transformed_offset);
        if count == 0 {
            return Ok(SliceOutcome::empty_at(transformed_offset));
        }

        let samples = raw.samples(raw_span);
        self.unwrap_windows(samples, count);
        let trigger = self.transform_windows(transformed_offset, count);
        self.draw_envelope(samples, transformed_offset, count);
        self.advance_cursor(raw_span, count);

        let produced = Span::new(transformed_offset, transformed_offset + count);
        self.grid.extend_populated(produced);
        colour.slice_render(&self.grid, produced);
        Ok(SliceOutcome { produced, trigger })
    }

    /// Restore the grid to its floor and blank the envelope; the FFT plan,
    /// window and buffers stay.
    pub fn reset(&mut self) {
        self.grid.reset();
        self.output
            .envelope()
            .update(|image| image.fill(ENVELOPE_BACKGROUND));
        self.output.set_cursor_time(0.0);
        self.output.publish(PipelineEvent::Redraw(ImageKind::Envelope));
    }

    fn window_count(&self, raw_span: Span, transformed_offset: usize) -> usize {
        let len = raw_span.len();
        if len < self.params.window_size || transformed_offset >= self.params.time_buckets {
            return 0;
        }
        let fitting = (len - self.params.window_size) / self.params.stride + 1;
        fitting
            .min(self.params.slice_time_buckets)
            .min(self.params.time_buckets - transformed_offset)
    }

    /// Gather W samples per window at stride S and taper them, windows laid
    /// back to back in the scratch. This is the hot copy; keep it branch
    /// free per sample.
    fn unwrap_windows(&mut self, samples: &[i16], count: usize) {
        let w = self.params.window_size;
        let stride = self.params.stride;
        for k in 0..count {
            let src = &samples[k * stride..k * stride + w];
            let dst = &mut self.unwrap_scratch[k * w..(k + 1) * w];
            for ((slot, &sample), &coeff) in dst.iter_mut().zip(src).zip(self.window.iter()) {
                *slot = sample as f32 * SAMPLE_SCALE * coeff;
            }
        }
        debug_assert_eq!(
            self.unwrap_scratch[self.unwrap_scratch.len() - 1],
            SCRATCH_GUARD,
            "unwrap scratch guard overwritten"
        );
    }

    fn transform_windows(
        &mut self,
        transformed_offset: usize,
        count: usize,
    ) -> Option<TriggerMark> {
        let w = self.params.window_size;
        let mut trigger = None;
        for k in 0..count {
            self.real_buffer
                .copy_from_slice(&self.unwrap_scratch[k * w..(k + 1) * w]);
            self.fft
                .process_with_scratch(
                    &mut self.real_buffer,
                    &mut self.spectrum_buffer,
                    &mut self.fft_scratch,
                )
                .expect("real FFT forward transform");

            let row = self.grid.row_mut(transformed_offset + k);
            for (slot, bin) in row.iter_mut().zip(self.spectrum_buffer.iter()) {
                *slot = power_to_db(bin.norm_sqr() * self.normalization);
            }

            if trigger.is_none() && self.trigger_enabled {
                if let Some(peak) = band_peak(row, self.trigger_band) {
                    if peak >= self.trigger_threshold_db {
                        trigger = Some(TriggerMark {
                            time_secs: self.params.time_at_bucket(transformed_offset + k),
                            peak_db: peak,
                        });
                    }
                }
            }
        }
        if let Some(mark) = trigger {
            self.output.publish(PipelineEvent::Trigger(mark));
        }
        trigger
    }

    /// Raw min/max per window drawn as a vertical run in the matching
    /// envelope column. The whole column is repainted, so a rerender with a
    /// narrower extent leaves no pixels from the previous one.
    fn draw_envelope(&mut self, samples: &[i16], transformed_offset: usize, count: usize) {
        let w = self.params.window_size;
        let stride = self.params.stride;
        self.output.envelope().update(|image| {
            let height = image.height();
            if height == 0 || image.width() == 0 {
                return;
            }
            for k in 0..count {
                let column = transformed_offset + k;
                if column >= image.width() {
                    break;
                }
                let mut low = i16::MAX;
                let mut high = i16::MIN;
                for &sample in &samples[k * stride..k * stride + w] {
                    low = low.min(sample);
                    high = high.max(sample);
                }
                let top = amplitude_row(high, height);
                let bottom = amplitude_row(low, height);
                for y in 0..height {
                    let pixel = if (bottom..=top).contains(&y) {
                        ENVELOPE_FOREGROUND
                    } else {
                        ENVELOPE_BACKGROUND
                    };
                    image.put(column, y, pixel);
                }
            }
        });
        self.output.publish(PipelineEvent::Redraw(ImageKind::Envelope));
    }

    fn advance_cursor(&self, raw_span: Span, count: usize) {
        let end = raw_span.start + (count - 1) * self.params.stride + self.params.window_size;
        self.output
            .set_cursor_time(end as f32 / self.params.sample_rate as f32);
    }
}

#[inline]
fn amplitude_row(sample: i16, height: usize) -> usize {
    let normalized = (sample as f32 * SAMPLE_SCALE + 1.0) * 0.5;
    ((normalized * (height - 1) as f32).round() as usize).min(height - 1)
}

#[inline]
fn band_peak(row: &[f32], band: Span) -> Option<f32> {
    let band = band.intersect(Span::new(0, row.len()));
    if band.is_empty() {
        return None;
    }
    let mut peak = f32::NEG_INFINITY;
    for &value in &row[band.as_range()] {
        peak = peak.max(value);
    }
    Some(peak)
}
