//! Owns the pipeline instance and serializes every mutating operation.
//!
//! One exclusive lock covers build, teardown, reset, render and BnC for
//! their full duration. That is deliberately coarse: interleaving a rebuild
//! with a render or a BnC repaint would corrupt the grid or paint through a
//! stage that no longer exists. The display path stays off this lock
//! entirely; it reads the published images under their own slot mutexes.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::audio::SampleSource;
use crate::error::{PipelineError, PipelineResult};
use crate::output::{ImageKind, PipelineEvent, SharedOutput};
use crate::params::{PageInfo, Parameters, RenderSettings, ScreenGeometry};
use crate::pipeline::buffers::RawPageBuffer;
use crate::pipeline::colour::{BncRange, ColourMapStage, db_to_logical};
use crate::pipeline::source::DataSourceStage;
use crate::pipeline::transform::TransformStage;
use crate::pipeline::{SliceOutcome, Span};
use crate::util::DB_SPAN_MIN;

/// Fraction of the visible dynamic range placed below the auto black point.
pub const AUTO_BNC_BLACK_POINT: f32 = 0.25;

/// Observable pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Absent,
    Building,
    Ready,
}

/// Everything one rebuild needs.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest {
    pub settings: RenderSettings,
    pub geometry: ScreenGeometry,
    /// Absolute sample index where the page begins.
    pub page_start: u64,
    /// Height of the amplitude envelope strip, pixels.
    pub envelope_height: usize,
    /// Keep the previous raw buffer when page and capacity are unchanged.
    pub reuse_raw: bool,
    /// Run a full render as part of the build.
    pub render: bool,
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self {
            settings: RenderSettings::default(),
            geometry: ScreenGeometry::default(),
            page_start: 0,
            envelope_height: 64,
            reuse_raw: false,
            render: true,
        }
    }
}

/// One built pipeline. Field order doubles as the release order on drop:
/// source first, then transform, then colour map.
struct PipelineInstance {
    params: Parameters,
    source: DataSourceStage,
    transform: TransformStage,
    colour: ColourMapStage,
}

/// Raw buffer kept aside during teardown, tagged with the page it holds.
struct CachedRaw {
    page_start: u64,
    paged_len: usize,
    buffer: RawPageBuffer,
}

impl CachedRaw {
    fn matches(&self, params: &Parameters) -> bool {
        self.page_start == params.page_start && self.paged_len == params.paged_len
    }
}

#[derive(Default)]
struct OrchestratorInner {
    state: PipelineState,
    instance: Option<PipelineInstance>,
}

pub struct PipelineOrchestrator {
    inner: Mutex<OrchestratorInner>,
    output: Arc<SharedOutput>,
}

impl PipelineOrchestrator {
    pub fn new(output: Arc<SharedOutput>) -> Self {
        Self {
            inner: Mutex::new(OrchestratorInner::default()),
            output,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().state
    }

    pub fn parameters(&self) -> Option<Parameters> {
        self.inner.lock().instance.as_ref().map(|i| i.params)
    }

    pub fn page_info(&self) -> Option<PageInfo> {
        self.inner.lock().instance.as_ref().map(|i| i.params.page_info())
    }

    pub fn bnc(&self) -> Option<BncRange> {
        self.inner.lock().instance.as_ref().map(|i| i.colour.range())
    }

    pub fn summary(&self) -> Option<String> {
        self.inner.lock().instance.as_ref().map(|i| i.params.summary())
    }

    /// Full rebuild. Any existing instance is torn down first, without
    /// signalling the display; its images keep showing until the new stages
    /// replace them, so a rebuild never flashes blank. On failure the
    /// pipeline rolls back to Absent and the outputs are blanked.
    pub fn build(
        &self,
        source: Box<dyn SampleSource>,
        request: BuildRequest,
    ) -> PipelineResult<String> {
        let mut inner = self.inner.lock();
        inner.state = PipelineState::Building;
        let cached = inner
            .instance
            .take()
            .and_then(|instance| teardown_into_cache(instance, request.reuse_raw));

        match self.build_instance(source, &request, cached) {
            Ok(mut instance) => {
                if request.render {
                    let PipelineInstance {
                        source,
                        transform,
                        colour,
                        ..
                    } = &mut instance;
                    if let Err(err) = source.full_render(transform, colour) {
                        drop(instance);
                        inner.state = PipelineState::Absent;
                        self.output.clear_images();
                        self.publish_blank();
                        error!("[pipeline] full render failed: {err}");
                        return Err(err);
                    }
                }
                let summary = instance.params.summary();
                info!("[pipeline] built {summary}");
                inner.instance = Some(instance);
                inner.state = PipelineState::Ready;
                Ok(summary)
            }
            Err(err) => {
                inner.state = PipelineState::Absent;
                self.output.clear_images();
                self.publish_blank();
                error!("[pipeline] build failed: {err}");
                Err(err)
            }
        }
    }

    /// Render one slice. A no-op returning an empty outcome when no
    /// pipeline is built.
    pub fn slice_render(
        &self,
        raw_span: Span,
        transformed_offset: usize,
    ) -> PipelineResult<SliceOutcome> {
        let mut inner = self.inner.lock();
        let Some(instance) = inner.instance.as_mut() else {
            return Ok(SliceOutcome::empty_at(transformed_offset));
        };
        let PipelineInstance {
            source,
            transform,
            colour,
            ..
        } = instance;
        source.slice_render(raw_span, transformed_offset, transform, colour)
    }

    /// Render the next slice past the populated grid range. Convenience for
    /// live feeds polled on a timer.
    pub fn advance(&self) -> PipelineResult<SliceOutcome> {
        let mut inner = self.inner.lock();
        let Some(instance) = inner.instance.as_mut() else {
            return Ok(SliceOutcome::empty_at(0));
        };
        let PipelineInstance {
            params,
            source,
            transform,
            colour,
        } = instance;
        let offset = transform.populated().end;
        let start = offset * params.stride;
        let span = Span::new(start, start + params.raw_slice_entries);
        source.slice_render(span, offset, transform, colour)
    }

    /// Clear all rendered data back to defaults. Stages, buffers and
    /// Parameters stay as built.
    pub fn reset_state(&self) -> PipelineResult<()> {
        let mut inner = self.inner.lock();
        let Some(instance) = inner.instance.as_mut() else {
            return Ok(());
        };
        instance.source.reset();
        instance.transform.reset();
        instance.colour.reset();
        Ok(())
    }

    /// Change the BnC range and repaint the colour image from the existing
    /// grid. The transform output is reused untouched.
    pub fn apply_bnc(&self, range: BncRange) -> PipelineResult<()> {
        let mut inner = self.inner.lock();
        let Some(instance) = inner.instance.as_mut() else {
            return Err(PipelineError::NotBuilt);
        };
        instance.colour.set_range(range);
        instance.colour.full_render(instance.transform.grid());
        Ok(())
    }

    /// Suggest a BnC range from the intensities in the visible part of the
    /// grid: black point a quarter into the visible dynamic range, white
    /// point at the maximum. The full span when nothing is populated.
    pub fn auto_bnc(&self, visible_time_fraction: f32, visible_freq_fraction: f32) -> BncRange {
        let inner = self.inner.lock();
        let Some(instance) = inner.instance.as_ref() else {
            return BncRange::full();
        };
        let params = &instance.params;
        let times = visible_span(params.time_buckets, visible_time_fraction);
        let freqs = visible_span(params.freq_buckets, visible_freq_fraction);
        match instance.transform.grid().min_max_in(times, freqs) {
            Some((min, max)) => bnc_from_extrema(min, max),
            None => BncRange::full(),
        }
    }

    /// Tear down the instance and blank the outputs. Image handles are
    /// dropped only after the stages have released their buffers, then the
    /// display is signalled to repaint.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.state = PipelineState::Absent;
        if let Some(instance) = inner.instance.take() {
            drop(instance);
            self.output.clear_images();
            self.publish_blank();
            info!("[pipeline] shut down");
        }
    }

    fn build_instance(
        &self,
        source: Box<dyn SampleSource>,
        request: &BuildRequest,
        cached: Option<CachedRaw>,
    ) -> PipelineResult<PipelineInstance> {
        let sample_rate = source.sample_rate();
        // Live feeds keep growing; size the page to its capacity so the
        // grid has room for data arriving after the build.
        let total_samples = if source.is_live() {
            let capacity = (request.settings.max_page_seconds * sample_rate as f32) as u64;
            request.page_start.saturating_add(capacity)
        } else {
            source.available()
        };
        let params = Parameters::derive(
            &request.settings,
            &request.geometry,
            sample_rate,
            total_samples,
            request.page_start,
        )?;

        let colour = ColourMapStage::new(
            &params,
            request.settings.palette_size,
            Arc::clone(&self.output),
        )?;
        let transform = TransformStage::new(
            params,
            request.settings.trigger,
            request.envelope_height,
            Arc::clone(&self.output),
        );
        let reuse = cached.and_then(|raw| raw.matches(&params).then_some(raw.buffer));
        Ok(PipelineInstance {
            params,
            source: DataSourceStage::new(params, source, reuse),
            transform,
            colour,
        })
    }

    fn publish_blank(&self) {
        self.output.publish(PipelineEvent::Redraw(ImageKind::Colour));
        self.output.publish(PipelineEvent::Redraw(ImageKind::Envelope));
    }
}

/// Release the stages of a torn-down instance in order: source first, then
/// transform, then colour map. The raw buffer survives only on request.
fn teardown_into_cache(instance: PipelineInstance, reuse_raw: bool) -> Option<CachedRaw> {
    let PipelineInstance {
        params,
        source,
        transform,
        colour,
    } = instance;
    let cached = if reuse_raw {
        Some(CachedRaw {
            page_start: params.page_start,
            paged_len: params.paged_len,
            buffer: source.into_buffer(),
        })
    } else {
        drop(source);
        None
    };
    drop(transform);
    drop(colour);
    cached
}

/// Leading `fraction` of `buckets` as a span from zero.
fn visible_span(buckets: usize, fraction: f32) -> Span {
    let count = (buckets as f32 * fraction.clamp(0.0, 1.0)).ceil() as usize;
    Span::new(0, count.min(buckets))
}

fn bnc_from_extrema(min_db: f32, max_db: f32) -> BncRange {
    let floor = min_db.max(DB_SPAN_MIN);
    let low_db = floor + AUTO_BNC_BLACK_POINT * (max_db - floor);
    BncRange::new(db_to_logical(low_db), db_to_logical(max_db))
}
