//! Utility functions and constants for sonoscope.

pub mod telemetry;

/// Lower edge of the supported intensity span (dB). Grid cells are
/// initialised to this floor and magnitudes never fall below it.
pub const DB_SPAN_MIN: f32 = -120.0;

/// Upper edge of the supported intensity span (dB).
pub const DB_SPAN_MAX: f32 = 0.0;

/// Base-2 log to decibel conversion factor: 10 / log2(10).
pub const DB_LOG2_FACTOR: f32 = 3.010_299_9;

/// Minimum power value to avoid log(0) in dB conversions.
pub const POWER_EPSILON: f32 = 1.0e-18;

/// Scale mapping signed 16-bit samples into `[-1.0, 1.0)`.
pub const SAMPLE_SCALE: f32 = 1.0 / 32_768.0;

/// Width of the supported intensity span (dB).
#[inline]
pub fn db_span_width() -> f32 {
    DB_SPAN_MAX - DB_SPAN_MIN
}

/// Convert power (magnitude squared, already normalised) to decibels,
/// floored at [`DB_SPAN_MIN`].
#[inline(always)]
pub fn power_to_db(power: f32) -> f32 {
    if power > POWER_EPSILON {
        (power.log2() * DB_LOG2_FACTOR).max(DB_SPAN_MIN)
    } else {
        DB_SPAN_MIN
    }
}

#[inline(always)]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_to_db_matches_log10_form() {
        for &power in &[1.0f32, 0.5, 1.0e-3, 1.0e-9] {
            let expected = 10.0 * power.log10();
            let got = power_to_db(power);
            assert!(
                (got - expected).abs() < 1.0e-3,
                "power {power}: got {got}, expected {expected}"
            );
        }
    }

    #[test]
    fn power_to_db_floors_tiny_values() {
        assert_eq!(power_to_db(0.0), DB_SPAN_MIN);
        assert_eq!(power_to_db(1.0e-30), DB_SPAN_MIN);
    }

    #[test]
    fn lerp_endpoints() {
        assert_eq!(lerp(-3.0, 5.0, 0.0), -3.0);
        assert_eq!(lerp(-3.0, 5.0, 1.0), 5.0);
        assert_eq!(lerp(0.0, 10.0, 0.25), 2.5);
    }
}
