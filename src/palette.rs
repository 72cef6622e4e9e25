//! Intensity-to-colour lookup for rendered bitmaps.
//!
//! The gradient is sampled once into a packed ARGB table; per-pixel work in
//! the colour stage is then a single index. The table holds `size + 1`
//! entries so a colour index clamped to `size` inclusive stays in range.

use crate::util::lerp;

/// Default gradient stops, dark to bright.
pub const DEFAULT_GRADIENT: [[f32; 3]; 5] = [
    [0.000, 0.000, 0.000],
    [0.218, 0.106, 0.332],
    [0.609, 0.000, 0.000],
    [1.000, 0.737, 0.353],
    [1.000, 1.000, 1.000],
];

/// Pre-sampled colour table.
#[derive(Debug, Clone)]
pub struct Palette {
    table: Vec<u32>,
}

impl Palette {
    /// Sample `stops` (at least two, evenly spaced) into `size + 1` packed
    /// ARGB entries. A `size` below 1 is raised to 1.
    pub fn new(size: usize, stops: &[[f32; 3]]) -> Self {
        debug_assert!(stops.len() >= 2, "palette needs at least two stops");
        let size = size.max(1);
        let mut table = Vec::with_capacity(size + 1);
        for step in 0..=size {
            let position = step as f32 / size as f32;
            let [r, g, b] = sample_gradient(stops, position);
            table.push(pack_argb(r, g, b));
        }
        Self { table }
    }

    pub fn with_default_gradient(size: usize) -> Self {
        Self::new(size, &DEFAULT_GRADIENT)
    }

    /// Number of colour steps; valid indices are `0..=size()`.
    #[inline]
    pub fn size(&self) -> usize {
        self.table.len() - 1
    }

    /// Packed ARGB colour for a clamped colour index.
    #[inline(always)]
    pub fn colour(&self, index: usize) -> u32 {
        self.table[index]
    }
}

fn sample_gradient(stops: &[[f32; 3]], position: f32) -> [f32; 3] {
    let segments = stops.len() - 1;
    let scaled = position.clamp(0.0, 1.0) * segments as f32;
    let index = (scaled as usize).min(segments - 1);
    let t = scaled - index as f32;
    let lo = stops[index];
    let hi = stops[index + 1];
    [
        lerp(lo[0], hi[0], t),
        lerp(lo[1], hi[1], t),
        lerp(lo[2], hi[2], t),
    ]
}

#[inline]
fn pack_argb(r: f32, g: f32, b: f32) -> u32 {
    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
    0xFF00_0000 | (quantize(r) << 16) | (quantize(g) << 8) | quantize(b)
}
