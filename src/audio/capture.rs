//! Live capture feed.
//!
//! Producers stamp each mono block with its absolute start index and push
//! without blocking; a real-time callback must never stall on the consumer.
//! [`LiveSource`] drains the feed into a rolling window and serves pipeline
//! reads from it, zero-filling any gaps left by dropped blocks.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::SampleSource;
use super::ring_buffer::RingBuffer;
use crate::error::PipelineResult;

/// Number of pending blocks the feed keeps before overwriting the oldest.
const FEED_BLOCK_CAPACITY: usize = 256;

/// Mono sample run stamped with its absolute position in the stream.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub start: u64,
    pub samples: Vec<i16>,
}

/// Shared queue between a capture callback and the pipeline, guarded by a
/// mutex and wired to a condvar so consumers can await new blocks.
pub struct CaptureFeed {
    blocks: Mutex<RingBuffer<SampleBlock>>,
    available: Condvar,
    sample_rate: u32,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureFeed {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            blocks: Mutex::new(RingBuffer::with_capacity(FEED_BLOCK_CAPACITY)),
            available: Condvar::new(),
            sample_rate,
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Enqueue a block without blocking. When the consumer holds the lock or
    /// the queue is full the oldest data is dropped and counted.
    pub fn push_block(&self, block: SampleBlock) {
        let end = block.start + block.samples.len() as u64;
        match self.blocks.try_lock() {
            Some(mut guard) => {
                if let Some(displaced) = guard.push(block) {
                    self.dropped
                        .fetch_add(displaced.samples.len() as u64, Ordering::Relaxed);
                }
                self.available.notify_one();
            }
            None => {
                let behind = end.saturating_sub(self.received.load(Ordering::Relaxed));
                self.dropped.fetch_add(behind, Ordering::Relaxed);
            }
        }
        self.received.fetch_max(end, Ordering::Relaxed);
    }

    pub fn try_pop(&self) -> Option<SampleBlock> {
        self.blocks.lock().pop()
    }

    /// Wait up to `timeout` for the next block.
    pub fn pop_wait(&self, timeout: Duration) -> Option<SampleBlock> {
        let mut guard = self.blocks.lock();
        if let Some(block) = guard.pop() {
            return Some(block);
        }
        if timeout.is_zero() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.available.wait_until(&mut guard, deadline).timed_out() {
                return guard.pop();
            }
            if let Some(block) = guard.pop() {
                return Some(block);
            }
            // Spurious wake-up; keep waiting against the same deadline.
        }
    }

    /// High-water mark of stream positions seen so far.
    pub fn received_samples(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Pipeline-facing view over a [`CaptureFeed`].
///
/// Keeps the most recent `window_capacity` samples contiguous in memory.
/// Positions that aged out of the window read back as silence.
pub struct LiveSource {
    feed: Arc<CaptureFeed>,
    window: VecDeque<i16>,
    window_start: u64,
    window_capacity: usize,
}

impl LiveSource {
    pub fn new(feed: Arc<CaptureFeed>, window_capacity: usize) -> Self {
        Self {
            feed,
            window: VecDeque::with_capacity(window_capacity.max(1)),
            window_start: 0,
            window_capacity: window_capacity.max(1),
        }
    }

    fn drain_feed(&mut self) {
        while let Some(block) = self.feed.try_pop() {
            self.append_block(block);
        }
    }

    fn append_block(&mut self, block: SampleBlock) {
        let window_end = self.window_start + self.window.len() as u64;
        if block.start > window_end {
            let gap = block.start - window_end;
            warn!("[capture] {gap} sample gap in live feed, zero filling");
            if gap as usize >= self.window_capacity {
                self.window.clear();
                self.window_start = block.start;
            } else {
                self.window.extend(std::iter::repeat(0).take(gap as usize));
            }
        }

        let window_end = self.window_start + self.window.len() as u64;
        let stale = window_end.saturating_sub(block.start) as usize;
        if stale >= block.samples.len() {
            debug!(
                "[capture] discarding stale block at {} ({} samples)",
                block.start,
                block.samples.len()
            );
            return;
        }
        self.window.extend(block.samples[stale..].iter().copied());

        if self.window.len() > self.window_capacity {
            let excess = self.window.len() - self.window_capacity;
            self.window.drain(..excess);
            self.window_start += excess as u64;
        }
    }
}

impl SampleSource for LiveSource {
    fn sample_rate(&self) -> u32 {
        self.feed.sample_rate()
    }

    fn available(&self) -> u64 {
        self.feed.received_samples()
    }

    fn read(&mut self, start: u64, dest: &mut [i16]) -> PipelineResult<usize> {
        self.drain_feed();
        let window_end = self.window_start + self.window.len() as u64;
        if start >= window_end {
            return Ok(0);
        }
        let mut written = 0;
        for (index, slot) in dest.iter_mut().enumerate() {
            let position = start + index as u64;
            if position >= window_end {
                break;
            }
            *slot = if position < self.window_start {
                0
            } else {
                self.window[(position - self.window_start) as usize]
            };
            written += 1;
        }
        Ok(written)
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start: u64, values: &[i16]) -> SampleBlock {
        SampleBlock {
            start,
            samples: values.to_vec(),
        }
    }

    #[test]
    fn feed_hands_blocks_back_in_order() {
        let feed = CaptureFeed::new(48_000);
        feed.push_block(block(0, &[1, 2]));
        feed.push_block(block(2, &[3, 4]));

        assert_eq!(feed.received_samples(), 4);
        assert_eq!(feed.try_pop().unwrap().start, 0);
        assert_eq!(feed.try_pop().unwrap().start, 2);
        assert!(feed.try_pop().is_none());
    }

    #[test]
    fn pop_wait_times_out_on_empty_feed() {
        let feed = CaptureFeed::new(48_000);
        assert!(feed.pop_wait(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn overflowing_feed_counts_dropped_samples() {
        let feed = CaptureFeed::new(48_000);
        for index in 0..(FEED_BLOCK_CAPACITY as u64 + 10) {
            feed.push_block(block(index * 4, &[0, 0, 0, 0]));
        }
        assert_eq!(feed.dropped_samples(), 40);
    }

    #[test]
    fn live_source_serves_contiguous_stream() {
        let feed = Arc::new(CaptureFeed::new(48_000));
        feed.push_block(block(0, &(0..100).map(|i| i as i16).collect::<Vec<_>>()));
        feed.push_block(block(
            100,
            &(100..200).map(|i| i as i16).collect::<Vec<_>>(),
        ));

        let mut source = LiveSource::new(feed, 1_000);
        assert!(source.is_live());
        assert_eq!(source.available(), 200);

        let mut buffer = [0i16; 50];
        assert_eq!(source.read(75, &mut buffer).unwrap(), 50);
        assert_eq!(buffer[0], 75);
        assert_eq!(buffer[49], 124);

        assert_eq!(source.read(190, &mut buffer).unwrap(), 10);
        assert_eq!(buffer[9], 199);
    }

    #[test]
    fn gap_in_feed_reads_as_silence() {
        let feed = Arc::new(CaptureFeed::new(48_000));
        feed.push_block(block(0, &[7; 100]));
        feed.push_block(block(200, &[9; 100]));

        let mut source = LiveSource::new(feed, 1_000);
        let mut buffer = [1i16; 300];
        assert_eq!(source.read(0, &mut buffer).unwrap(), 300);
        assert_eq!(buffer[99], 7);
        assert_eq!(buffer[100], 0);
        assert_eq!(buffer[199], 0);
        assert_eq!(buffer[200], 9);
    }

    #[test]
    fn aged_out_positions_read_as_silence() {
        let feed = Arc::new(CaptureFeed::new(48_000));
        feed.push_block(block(0, &[5; 100]));
        feed.push_block(block(100, &[6; 100]));

        let mut source = LiveSource::new(feed, 50);
        let mut buffer = [1i16; 10];
        // Window retains only 150..200; earlier positions are silence.
        assert_eq!(source.read(0, &mut buffer).unwrap(), 10);
        assert_eq!(buffer, [0; 10]);

        assert_eq!(source.read(160, &mut buffer).unwrap(), 10);
        assert_eq!(buffer, [6; 10]);
    }

    #[test]
    fn stale_blocks_are_discarded() {
        let feed = Arc::new(CaptureFeed::new(48_000));
        feed.push_block(block(0, &[1; 100]));
        let mut source = LiveSource::new(feed.clone(), 1_000);
        let mut buffer = [0i16; 4];
        assert_eq!(source.read(0, &mut buffer).unwrap(), 4);

        // Replay of already-covered positions must not corrupt the window.
        feed.push_block(block(50, &[2; 20]));
        assert_eq!(source.read(60, &mut buffer).unwrap(), 4);
        assert_eq!(buffer, [1; 4]);
    }
}
