//! Source stage: pages raw samples in and drives the stage chain in slice
//! order.
//!
//! The raw page is filled as a growing prefix. Each slice request clips to
//! the page, pulls whatever the source can still provide, and forwards only
//! the range actually covered; a short or failed read degrades that one
//! slice and later slices simply try again further along.

use tracing::warn;

use crate::audio::SampleSource;
use crate::error::PipelineResult;
use crate::params::Parameters;
use crate::pipeline::buffers::RawPageBuffer;
use crate::pipeline::colour::ColourMapStage;
use crate::pipeline::transform::TransformStage;
use crate::pipeline::{SliceOutcome, Span};

/// Upper bound on a single source read, in samples.
const READ_CHUNK: usize = 65_536;

pub struct DataSourceStage {
    params: Parameters,
    buffer: RawPageBuffer,
    source: Box<dyn SampleSource>,
    chunk: Vec<i16>,
}

impl DataSourceStage {
    /// `reuse` carries the raw buffer of a torn-down instance; it is kept,
    /// contents and coverage included, only when its capacity still matches.
    pub fn new(
        params: Parameters,
        source: Box<dyn SampleSource>,
        reuse: Option<RawPageBuffer>,
    ) -> Self {
        let buffer = match reuse {
            Some(existing) if existing.page_len() == params.paged_len => existing,
            _ => RawPageBuffer::new(params.paged_len),
        };
        let chunk_len = READ_CHUNK.min(params.paged_len.max(1));
        Self {
            params,
            buffer,
            source,
            chunk: vec![0; chunk_len],
        }
    }

    pub fn buffer(&self) -> &RawPageBuffer {
        &self.buffer
    }

    pub fn populated(&self) -> Span {
        self.buffer.populated()
    }

    /// Hand the raw buffer back for caching across a rebuild.
    pub fn into_buffer(self) -> RawPageBuffer {
        self.buffer
    }

    /// Zero the page and empty raw coverage; the allocation stays.
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Clip `raw_span` to the page, fill what the source can provide, and
    /// forward the covered range to the transform stage.
    pub fn slice_render(
        &mut self,
        raw_span: Span,
        transformed_offset: usize,
        transform: &mut TransformStage,
        colour: &ColourMapStage,
    ) -> PipelineResult<SliceOutcome> {
        let page_len = self.params.paged_len;
        let clipped = Span::new(raw_span.start.min(page_len), raw_span.end.min(page_len));
        if clipped.is_empty() {
            return Ok(SliceOutcome::empty_at(transformed_offset));
        }

        self.fill_through(clipped.end);

        let covered_end = clipped.end.min(self.buffer.populated().end);
        if covered_end <= clipped.start {
            return Ok(SliceOutcome::empty_at(transformed_offset));
        }
        let actual = Span::new(clipped.start, covered_end);
        transform.slice_render(
            &self.buffer,
            actual,
            transformed_offset,
            self.params.window_size,
            colour,
        )
    }

    /// Walk every slice of the page in increasing raw order. Hard stage
    /// failures abort; read problems only thin out the produced windows.
    pub fn full_render(
        &mut self,
        transform: &mut TransformStage,
        colour: &ColourMapStage,
    ) -> PipelineResult<usize> {
        let mut windows = 0;
        for index in 0..self.params.slice_count() {
            let start = self.params.slice_start(index);
            if start >= self.params.paged_len {
                break;
            }
            let span = Span::new(start, start + self.params.raw_slice_entries);
            let offset = index * self.params.slice_time_buckets;
            let outcome = self.slice_render(span, offset, transform, colour)?;
            windows += outcome.produced.len();
        }
        Ok(windows)
    }

    /// Grow the populated prefix up to `end`. Stops early on a short or
    /// failed read; the remainder stays uncovered.
    fn fill_through(&mut self, end: usize) {
        while self.buffer.populated().end < end {
            let at = self.buffer.populated().end;
            let want = (end - at).min(self.chunk.len());
            let absolute = self.params.page_start + at as u64;
            let read = match self.source.read(absolute, &mut self.chunk[..want]) {
                Ok(read) => read,
                Err(err) => {
                    warn!("[pipeline] source read failed at sample {absolute}: {err}");
                    0
                }
            };
            if read == 0 {
                break;
            }
            self.buffer.write(at, &self.chunk[..read]);
            if read < want {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySource;
    use crate::error::PipelineError;
    use crate::output::{ImageKind, PipelineEvent, SharedOutput};
    use crate::params::{
        OverlapMode, RenderSettings, ScreenGeometry, TriggerSettings, WindowMode,
    };
    use async_channel::Receiver;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingSource {
        inner: MemorySource,
        reads: Arc<Mutex<Vec<(u64, usize)>>>,
    }

    impl SampleSource for RecordingSource {
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn available(&self) -> u64 {
            self.inner.available()
        }

        fn read(&mut self, start: u64, dest: &mut [i16]) -> PipelineResult<usize> {
            let written = self.inner.read(start, dest)?;
            self.reads.lock().push((start, written));
            Ok(written)
        }
    }

    struct FailingSource;

    impl SampleSource for FailingSource {
        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn available(&self) -> u64 {
            1_000_000
        }

        fn read(&mut self, _start: u64, _dest: &mut [i16]) -> PipelineResult<usize> {
            Err(PipelineError::Source("backend offline".into()))
        }
    }

    fn params_for(total: u64) -> Parameters {
        let settings = RenderSettings {
            window: WindowMode::Explicit(1024),
            overlap: OverlapMode::Explicit(0.5),
            ..RenderSettings::default()
        };
        Parameters::derive(&settings, &ScreenGeometry::default(), 48_000, total, 0)
            .expect("parameters")
    }

    fn stages(
        params: Parameters,
    ) -> (
        TransformStage,
        ColourMapStage,
        Arc<SharedOutput>,
        Receiver<PipelineEvent>,
    ) {
        let (output, events) = SharedOutput::new();
        let transform =
            TransformStage::new(params, TriggerSettings::default(), 32, Arc::clone(&output));
        let colour = ColourMapStage::new(&params, 256, Arc::clone(&output)).expect("colour stage");
        (transform, colour, output, events)
    }

    fn ramp(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i % 4096) as i16).collect()
    }

    #[test]
    fn full_render_covers_every_time_bucket() {
        let total = 144_000u64;
        let params = params_for(total);
        let (mut transform, colour, _output, _events) = stages(params);
        let source = MemorySource::new(48_000, ramp(total as usize));
        let mut stage = DataSourceStage::new(params, Box::new(source), None);

        let windows = stage
            .full_render(&mut transform, &colour)
            .expect("full render");
        assert_eq!(windows, params.time_buckets);
        assert_eq!(transform.populated(), Span::new(0, params.time_buckets));
        assert_eq!(stage.populated(), Span::new(0, params.paged_len));
    }

    #[test]
    fn each_sample_is_fetched_exactly_once() {
        let total = 144_000u64;
        let params = params_for(total);
        let (mut transform, colour, _output, _events) = stages(params);
        let reads = Arc::new(Mutex::new(Vec::new()));
        let source = RecordingSource {
            inner: MemorySource::new(48_000, ramp(total as usize)),
            reads: Arc::clone(&reads),
        };
        let mut stage = DataSourceStage::new(params, Box::new(source), None);
        stage
            .full_render(&mut transform, &colour)
            .expect("full render");

        let log = reads.lock();
        let mut expected_start = 0u64;
        for &(start, written) in log.iter() {
            assert_eq!(start, expected_start, "overlap or gap in source reads");
            expected_start += written as u64;
        }
        assert_eq!(expected_start, total);
    }

    #[test]
    fn full_render_twice_yields_identical_images() {
        let total = 144_000u64;
        let params = params_for(total);
        let (mut transform, colour, output, _events) = stages(params);
        let source = MemorySource::new(48_000, ramp(total as usize));
        let mut stage = DataSourceStage::new(params, Box::new(source), None);

        stage
            .full_render(&mut transform, &colour)
            .expect("first render");
        let colour_first = output.colour().snapshot().expect("colour image");
        let envelope_first = output.envelope().snapshot().expect("envelope image");

        stage
            .full_render(&mut transform, &colour)
            .expect("second render");
        let colour_second = output.colour().snapshot().expect("colour image");
        let envelope_second = output.envelope().snapshot().expect("envelope image");
        assert_eq!(colour_second, colour_first);
        assert_eq!(envelope_second, envelope_first);
    }

    #[test]
    fn truncated_source_thins_out_later_slices() {
        let total = 144_000u64;
        let available = 50_000usize;
        let params = params_for(total);
        let (mut transform, colour, _output, _events) = stages(params);
        // The source claims the full total but only delivers a prefix.
        let source = MemorySource::new(48_000, ramp(available));
        let mut stage = DataSourceStage::new(params, Box::new(source), None);

        let windows = stage
            .full_render(&mut transform, &colour)
            .expect("full render");
        let expected = (available - params.window_size) / params.stride + 1;
        assert_eq!(windows, expected);
        assert_eq!(transform.populated(), Span::new(0, expected));
        assert_eq!(stage.populated(), Span::new(0, available));
    }

    #[test]
    fn empty_source_renders_nothing_and_skips_colour() {
        let params = params_for(144_000);
        let (mut transform, colour, _output, events) = stages(params);
        let source = MemorySource::new(48_000, Vec::new());
        let mut stage = DataSourceStage::new(params, Box::new(source), None);

        let windows = stage
            .full_render(&mut transform, &colour)
            .expect("full render");
        assert_eq!(windows, 0);
        assert!(transform.populated().is_empty());
        while let Ok(event) = events.try_recv() {
            assert_ne!(event, PipelineEvent::Redraw(ImageKind::Colour));
        }
    }

    #[test]
    fn failing_source_degrades_instead_of_aborting() {
        let params = params_for(144_000);
        let (mut transform, colour, _output, _events) = stages(params);
        let mut stage = DataSourceStage::new(params, Box::new(FailingSource), None);

        let windows = stage
            .full_render(&mut transform, &colour)
            .expect("full render");
        assert_eq!(windows, 0);
        assert!(stage.populated().is_empty());
    }

    #[test]
    fn cached_buffer_skips_refetch_on_rebuild() {
        let total = 144_000u64;
        let params = params_for(total);
        let (mut transform, colour, _output, _events) = stages(params);
        let source = MemorySource::new(48_000, ramp(total as usize));
        let mut stage = DataSourceStage::new(params, Box::new(source), None);
        stage
            .full_render(&mut transform, &colour)
            .expect("first render");
        let cached = stage.into_buffer();

        let (mut transform, colour, _output, _events) = stages(params);
        let reads = Arc::new(Mutex::new(Vec::new()));
        let source = RecordingSource {
            inner: MemorySource::new(48_000, ramp(total as usize)),
            reads: Arc::clone(&reads),
        };
        let mut stage = DataSourceStage::new(params, Box::new(source), Some(cached));

        let windows = stage
            .full_render(&mut transform, &colour)
            .expect("second render");
        assert_eq!(windows, params.time_buckets);
        assert!(reads.lock().is_empty(), "cached page was refetched");
    }

    #[test]
    fn out_of_order_slice_fills_the_gap_before_it() {
        let total = 144_000u64;
        let params = params_for(total);
        let (mut transform, colour, _output, _events) = stages(params);
        let source = MemorySource::new(48_000, ramp(total as usize));
        let mut stage = DataSourceStage::new(params, Box::new(source), None);

        let index = 2;
        let start = params.slice_start(index);
        let span = Span::new(start, start + params.raw_slice_entries);
        let offset = index * params.slice_time_buckets;
        let outcome = stage
            .slice_render(span, offset, &mut transform, &colour)
            .expect("slice render");

        assert_eq!(
            outcome.produced,
            Span::new(offset, offset + params.slice_time_buckets)
        );
        // Raw coverage is a prefix, so everything before the slice is in.
        assert_eq!(
            stage.populated(),
            Span::new(0, start + params.raw_slice_entries)
        );
    }
}
