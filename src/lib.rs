//! Streaming acoustic spectrogram pipeline.
//!
//! Samples from a WAV file or a live capture feed are paged into a raw
//! buffer, Hann-windowed and transformed into a time×frequency dB grid,
//! then mapped through a palette into shared output images. The
//! [`pipeline::orchestrator::PipelineOrchestrator`] serializes builds,
//! incremental slice renders and brightness/contrast changes while a
//! display path reads the published images concurrently.

pub mod audio;
pub mod error;
pub mod output;
pub mod palette;
pub mod params;
pub mod pipeline;
pub mod settings;
pub mod util;
