//! Sample sources feeding the pipeline.
//!
//! A source exposes mono signed 16-bit samples addressed by absolute index.
//! Finite sources (WAV files, in-memory buffers) have a fixed length; live
//! sources keep growing and tolerate positions that have aged out of their
//! window.

pub mod capture;
pub mod ring_buffer;
pub mod wav;

use crate::error::PipelineResult;

/// Random-access view over a mono sample stream.
pub trait SampleSource: Send {
    fn sample_rate(&self) -> u32;

    /// Samples currently addressable. Live feeds report a growing
    /// high-water mark.
    fn available(&self) -> u64;

    /// Copy samples starting at absolute index `start` into `dest`,
    /// returning how many were written. Short reads near the data edge are
    /// normal and not an error.
    fn read(&mut self, start: u64, dest: &mut [i16]) -> PipelineResult<usize>;

    /// Whether the source keeps appending data after the build.
    fn is_live(&self) -> bool {
        false
    }
}

/// Finite source over samples held in memory.
pub struct MemorySource {
    sample_rate: u32,
    samples: Vec<i16>,
}

impl MemorySource {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }
}

impl SampleSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn available(&self) -> u64 {
        self.samples.len() as u64
    }

    fn read(&mut self, start: u64, dest: &mut [i16]) -> PipelineResult<usize> {
        if start >= self.samples.len() as u64 {
            return Ok(0);
        }
        let start = start as usize;
        let count = dest.len().min(self.samples.len() - start);
        dest[..count].copy_from_slice(&self.samples[start..start + count]);
        Ok(count)
    }
}
