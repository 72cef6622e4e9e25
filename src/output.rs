//! Shared render output: published bitmaps, cursor position and pipeline
//! events.
//!
//! Stages write into the published images in place under the slot mutex, so
//! consumers always observe a consistent frame and incremental renders show
//! up without copying. Events ride a bounded channel; producers never block,
//! overflow is counted instead.

use async_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::pipeline::TriggerMark;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Which published image a redraw refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Colour,
    Envelope,
}

/// Notifications published while rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineEvent {
    Redraw(ImageKind),
    Trigger(TriggerMark),
}

/// CPU bitmap of packed ARGB pixels, stored top row first.
///
/// Callers address pixels with `y` measured from the bottom edge, matching
/// the frequency axis (bucket 0 at the bottom); the flip to bitmap row order
/// happens in [`FrameImage::offset`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    width: usize,
    height: usize,
    pixels: Vec<u32>,
}

impl FrameImage {
    pub fn new(width: usize, height: usize, fill: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; width * height],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel index for `(x, y)` with `y` counted upward from the bottom row.
    #[inline(always)]
    pub fn offset(&self, x: usize, y_from_bottom: usize) -> usize {
        debug_assert!(x < self.width && y_from_bottom < self.height);
        (self.height - 1 - y_from_bottom) * self.width + x
    }

    #[inline(always)]
    pub fn put(&mut self, x: usize, y_from_bottom: usize, colour: u32) {
        let offset = self.offset(x, y_from_bottom);
        self.pixels[offset] = colour;
    }

    #[inline]
    pub fn pixel(&self, x: usize, y_from_bottom: usize) -> u32 {
        self.pixels[self.offset(x, y_from_bottom)]
    }

    pub fn fill(&mut self, colour: u32) {
        self.pixels.fill(colour);
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Raw pixel bytes in native byte order, for upload or encoding.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
}

/// A published image behind a mutex; `None` when nothing is built.
#[derive(Default)]
pub struct ImageSlot {
    inner: Mutex<Option<FrameImage>>,
}

impl ImageSlot {
    pub fn replace(&self, image: FrameImage) {
        *self.inner.lock() = Some(image);
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    /// Run `f` against the published image, if any.
    pub fn with_image<R>(&self, f: impl FnOnce(&FrameImage) -> R) -> Option<R> {
        self.inner.lock().as_ref().map(f)
    }

    /// Mutate the published image in place, if any.
    pub fn update<R>(&self, f: impl FnOnce(&mut FrameImage) -> R) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }

    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.inner.lock().as_ref().map(|i| (i.width, i.height))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Snapshot the current image for consumers that outlive the lock.
    pub fn snapshot(&self) -> Option<FrameImage> {
        self.inner.lock().clone()
    }
}

/// Render output shared between the pipeline and its consumer.
pub struct SharedOutput {
    colour: ImageSlot,
    envelope: ImageSlot,
    cursor_bits: AtomicU32,
    events: Sender<PipelineEvent>,
    dropped_events: AtomicU64,
}

impl SharedOutput {
    pub fn new() -> (Arc<Self>, Receiver<PipelineEvent>) {
        let (events, receiver) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
        let output = Arc::new(Self {
            colour: ImageSlot::default(),
            envelope: ImageSlot::default(),
            cursor_bits: AtomicU32::new(0),
            events,
            dropped_events: AtomicU64::new(0),
        });
        (output, receiver)
    }

    pub fn colour(&self) -> &ImageSlot {
        &self.colour
    }

    pub fn envelope(&self) -> &ImageSlot {
        &self.envelope
    }

    /// Latest cursor position within the page, seconds.
    pub fn cursor_time(&self) -> f32 {
        f32::from_bits(self.cursor_bits.load(Ordering::Relaxed))
    }

    pub fn set_cursor_time(&self, seconds: f32) {
        self.cursor_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Non-blocking event publish; overflow bumps the drop counter.
    pub fn publish(&self, event: PipelineEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Drop both published images and rewind the cursor.
    pub fn clear_images(&self) {
        self.colour.clear();
        self.envelope.clear();
        self.set_cursor_time(0.0);
    }
}
