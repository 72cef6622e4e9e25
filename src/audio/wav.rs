//! WAV file source.
//!
//! Decodes integer and float PCM through hound, averages channels down to
//! mono and serves random-access reads by seeking to the requested frame.

use hound::{SampleFormat, WavReader, WavSpec};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

use super::SampleSource;
use crate::error::{PipelineError, PipelineResult};

pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    total_frames: u64,
    position: u64,
}

impl WavSource {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(PipelineError::Source(format!(
                "{} reports zero channels",
                path.display()
            )));
        }
        let total_frames = reader.duration() as u64;
        info!(
            "[wav] opened {}: {} Hz, {} ch, {} bit {}, {} frames",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            match spec.sample_format {
                SampleFormat::Int => "int",
                SampleFormat::Float => "float",
            },
            total_frames
        );
        Ok(Self {
            reader,
            spec,
            total_frames,
            position: 0,
        })
    }

    fn read_int_frames(&mut self, dest: &mut [i16]) -> PipelineResult<usize> {
        let channels = self.spec.channels as i64;
        let bits = self.spec.bits_per_sample;
        let mut samples = self.reader.samples::<i32>();
        let mut written = 0;
        'frames: for slot in dest.iter_mut() {
            let mut sum = 0i64;
            for _ in 0..channels {
                match samples.next() {
                    Some(sample) => sum += sample? as i64,
                    None => break 'frames,
                }
            }
            let frame = (sum / channels) as i32;
            *slot = if bits >= 16 {
                (frame >> (bits - 16)) as i16
            } else {
                (frame << (16 - bits)) as i16
            };
            written += 1;
        }
        Ok(written)
    }

    fn read_float_frames(&mut self, dest: &mut [i16]) -> PipelineResult<usize> {
        let channels = self.spec.channels as usize;
        let mut samples = self.reader.samples::<f32>();
        let mut written = 0;
        'frames: for slot in dest.iter_mut() {
            let mut sum = 0.0f32;
            for _ in 0..channels {
                match samples.next() {
                    Some(sample) => sum += sample?,
                    None => break 'frames,
                }
            }
            let mono = (sum / channels as f32).clamp(-1.0, 1.0);
            *slot = (mono * i16::MAX as f32) as i16;
            written += 1;
        }
        Ok(written)
    }
}

impl SampleSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn available(&self) -> u64 {
        self.total_frames
    }

    fn read(&mut self, start: u64, dest: &mut [i16]) -> PipelineResult<usize> {
        if start >= self.total_frames {
            return Ok(0);
        }
        if start != self.position {
            self.reader.seek(start as u32)?;
        }
        let want = dest.len().min((self.total_frames - start) as usize);
        let written = match self.spec.sample_format {
            SampleFormat::Int => self.read_int_frames(&mut dest[..want])?,
            SampleFormat::Float => self.read_float_frames(&mut dest[..want])?,
        };
        self.position = start + written as u64;
        Ok(written)
    }
}
