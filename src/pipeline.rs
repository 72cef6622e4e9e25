//! Staged rendering pipeline.
//!
//! This module provides the shared currency passed between the three stages
//! (source, transform, colour map) plus the buffers they operate on. The
//! orchestrator owns one instance of the whole chain and serialises every
//! mutating operation behind a single lock.

pub mod buffers;
pub mod colour;
pub mod orchestrator;
pub mod source;
pub mod transform;

/// Half-open index range `[start, end)`, the universal currency for raw
/// sample entries and time/frequency bucket spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Construct a span. Panics if `start > end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "span start {start} exceeds end {end}");
        Self { start, end }
    }

    pub const fn empty() -> Self {
        Self { start: 0, end: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    /// Overlapping portion of two spans; empty (at the clamped start) when
    /// they do not intersect.
    pub fn intersect(&self, other: Span) -> Span {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end).max(start);
        Span { start, end }
    }

    /// Grow the span to cover `other` as well. An empty span takes on
    /// `other` directly so a fresh buffer does not pin `[0, 0)` into the
    /// union.
    pub fn extend_to_cover(&mut self, other: Span) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
        } else {
            self.start = self.start.min(other.start);
            self.end = self.end.max(other.end);
        }
    }

    pub fn as_range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// A trigger hit observed inside one slice call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerMark {
    /// Window-centre time within the page, in seconds.
    pub time_secs: f32,
    /// Strongest in-band magnitude that crossed the threshold.
    pub peak_db: f32,
}

/// Result of one transform slice call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceOutcome {
    /// Time buckets produced by this call, `[offset, offset+window_count)`.
    pub produced: Span,
    /// At most one trigger per slice call.
    pub trigger: Option<TriggerMark>,
}

impl SliceOutcome {
    pub fn empty_at(offset: usize) -> Self {
        Self {
            produced: Span::new(offset, offset),
            trigger: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "span start")]
    fn span_rejects_inverted_bounds() {
        let _ = Span::new(5, 4);
    }

    #[test]
    fn span_intersection_clamps_to_overlap() {
        let a = Span::new(10, 20);
        assert_eq!(a.intersect(Span::new(15, 30)), Span::new(15, 20));
        assert_eq!(a.intersect(Span::new(0, 12)), Span::new(10, 12));
        assert!(a.intersect(Span::new(25, 30)).is_empty());
        assert!(a.intersect(Span::new(0, 5)).is_empty());
    }

    #[test]
    fn span_extension_absorbs_empty_state() {
        let mut populated = Span::empty();
        populated.extend_to_cover(Span::new(64, 128));
        assert_eq!(populated, Span::new(64, 128));

        populated.extend_to_cover(Span::new(128, 192));
        assert_eq!(populated, Span::new(64, 192));

        populated.extend_to_cover(Span::empty());
        assert_eq!(populated, Span::new(64, 192));
    }

    #[test]
    fn span_contains_is_half_open() {
        let span = Span::new(2, 4);
        assert!(!span.contains(1));
        assert!(span.contains(2));
        assert!(span.contains(3));
        assert!(!span.contains(4));
    }
}
