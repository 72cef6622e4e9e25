//! Backing storage for one rendered page: raw samples in, dB grid out.

use crate::pipeline::Span;
use crate::util::DB_SPAN_MIN;

/// Sentinel stored in the guard entry past the end of the raw page. Writes
/// that stay in bounds never touch it.
pub const RAW_GUARD: i16 = i16::MIN;

/// Raw mono samples for the current page plus one guard entry.
///
/// The populated span is a prefix `0..end`; the fill loop writes
/// sequentially and zero-fills gaps, so coverage never becomes sparse.
pub struct RawPageBuffer {
    data: Vec<i16>,
    populated: Span,
}

impl RawPageBuffer {
    pub fn new(page_len: usize) -> Self {
        let mut data = vec![0i16; page_len + 1];
        data[page_len] = RAW_GUARD;
        Self {
            data,
            populated: Span::empty(),
        }
    }

    #[inline]
    pub fn page_len(&self) -> usize {
        self.data.len() - 1
    }

    #[inline]
    pub fn populated(&self) -> Span {
        self.populated
    }

    /// Copy `samples` into the page at `offset` and extend coverage over
    /// them. The write must fit the page.
    pub fn write(&mut self, offset: usize, samples: &[i16]) {
        let end = offset + samples.len();
        debug_assert!(end <= self.page_len(), "write past page end");
        self.data[offset..end].copy_from_slice(samples);
        self.populated.extend_to_cover(Span::new(offset, end));
        debug_assert!(self.guard_intact());
    }

    /// Samples within `span`, which must lie inside the page.
    pub fn samples(&self, span: Span) -> &[i16] {
        &self.data[span.as_range()]
    }

    /// Zero the page, restore the guard entry and empty the populated span.
    pub fn reset(&mut self) {
        let last = self.data.len() - 1;
        self.data[..last].fill(0);
        self.data[last] = RAW_GUARD;
        self.populated = Span::empty();
    }

    pub fn guard_intact(&self) -> bool {
        self.data[self.data.len() - 1] == RAW_GUARD
    }
}

/// Transformed magnitudes in dB, time-major: row `t` holds all frequency
/// buckets of one analysis window.
pub struct SpectralGrid {
    time_buckets: usize,
    freq_buckets: usize,
    values: Vec<f32>,
    populated: Span,
}

impl SpectralGrid {
    pub fn new(time_buckets: usize, freq_buckets: usize) -> Self {
        Self {
            time_buckets,
            freq_buckets,
            values: vec![DB_SPAN_MIN; time_buckets * freq_buckets],
            populated: Span::empty(),
        }
    }

    #[inline]
    pub fn time_buckets(&self) -> usize {
        self.time_buckets
    }

    #[inline]
    pub fn freq_buckets(&self) -> usize {
        self.freq_buckets
    }

    /// Time buckets holding transformed data, a prefix `0..end`.
    #[inline]
    pub fn populated(&self) -> Span {
        self.populated
    }

    pub fn row(&self, time_bucket: usize) -> &[f32] {
        let start = time_bucket * self.freq_buckets;
        &self.values[start..start + self.freq_buckets]
    }

    pub fn row_mut(&mut self, time_bucket: usize) -> &mut [f32] {
        let start = time_bucket * self.freq_buckets;
        &mut self.values[start..start + self.freq_buckets]
    }

    #[inline]
    pub fn value(&self, time_bucket: usize, freq_bucket: usize) -> f32 {
        self.values[time_bucket * self.freq_buckets + freq_bucket]
    }

    /// Extend coverage over the given time buckets.
    pub fn extend_populated(&mut self, span: Span) {
        debug_assert!(span.end <= self.time_buckets);
        self.populated.extend_to_cover(span);
    }

    /// Smallest and largest dB value inside the requested region, limited to
    /// populated rows. `None` when nothing populated intersects it.
    pub fn min_max_in(&self, times: Span, freqs: Span) -> Option<(f32, f32)> {
        let times = times.intersect(self.populated);
        let freqs = freqs.intersect(Span::new(0, self.freq_buckets));
        if times.is_empty() || freqs.is_empty() {
            return None;
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for t in times.as_range() {
            for &value in &self.row(t)[freqs.as_range()] {
                min = min.min(value);
                max = max.max(value);
            }
        }
        Some((min, max))
    }

    /// Refill with the dB floor and empty the populated span.
    pub fn reset(&mut self) {
        self.values.fill(DB_SPAN_MIN);
        self.populated = Span::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_buffer_guard_survives_writes_and_reset() {
        let mut buffer = RawPageBuffer::new(64);
        assert!(buffer.guard_intact());
        assert!(buffer.populated().is_empty());

        buffer.write(0, &[5; 32]);
        assert!(buffer.guard_intact());
        assert_eq!(buffer.populated(), Span::new(0, 32));

        buffer.write(32, &[6; 32]);
        assert_eq!(buffer.populated(), Span::new(0, 64));
        assert!(buffer.guard_intact());

        buffer.reset();
        assert!(buffer.populated().is_empty());
        assert!(buffer.guard_intact());
    }

    #[test]
    fn reset_zeroes_previous_samples() {
        let mut buffer = RawPageBuffer::new(8);
        buffer.write(0, &[7; 8]);
        buffer.reset();
        assert_eq!(buffer.samples(Span::new(0, 8)), &[0; 8]);
        assert!(buffer.guard_intact());
    }

    #[test]
    fn samples_view_returns_written_data() {
        let mut buffer = RawPageBuffer::new(100);
        buffer.write(0, &[3; 40]);
        buffer.write(40, &[4; 20]);
        assert_eq!(buffer.populated(), Span::new(0, 60));
        assert_eq!(buffer.samples(Span::new(38, 42)), &[3, 3, 4, 4]);
    }

    #[test]
    #[should_panic(expected = "write past page end")]
    fn write_past_page_end_is_rejected() {
        let mut buffer = RawPageBuffer::new(16);
        buffer.write(10, &[0; 7]);
    }

    #[test]
    fn grid_starts_at_floor_and_tracks_population() {
        let mut grid = SpectralGrid::new(8, 5);
        assert_eq!(grid.value(3, 2), DB_SPAN_MIN);
        assert!(grid.populated().is_empty());

        grid.row_mut(0).fill(-30.0);
        grid.row_mut(1).fill(-20.0);
        grid.extend_populated(Span::new(0, 2));
        assert_eq!(grid.populated(), Span::new(0, 2));
        assert_eq!(grid.value(1, 4), -20.0);
        assert_eq!(grid.value(2, 0), DB_SPAN_MIN);
    }

    #[test]
    fn min_max_ignores_unpopulated_rows() {
        let mut grid = SpectralGrid::new(4, 3);
        grid.row_mut(0).copy_from_slice(&[-50.0, -10.0, -40.0]);
        grid.row_mut(1).copy_from_slice(&[-60.0, -5.0, -45.0]);
        grid.row_mut(2).copy_from_slice(&[-1.0, -1.0, -1.0]);
        grid.extend_populated(Span::new(0, 2));

        let (min, max) = grid.min_max_in(Span::new(0, 4), Span::new(0, 3)).unwrap();
        assert_eq!(min, -60.0);
        assert_eq!(max, -5.0);

        let (min, max) = grid.min_max_in(Span::new(0, 2), Span::new(1, 2)).unwrap();
        assert_eq!(min, -10.0);
        assert_eq!(max, -5.0);

        assert!(grid.min_max_in(Span::new(2, 4), Span::new(0, 3)).is_none());
    }

    #[test]
    fn grid_reset_restores_floor() {
        let mut grid = SpectralGrid::new(2, 2);
        grid.row_mut(0).fill(0.0);
        grid.extend_populated(Span::new(0, 1));
        grid.reset();
        assert!(grid.populated().is_empty());
        assert_eq!(grid.value(0, 0), DB_SPAN_MIN);
    }
}
