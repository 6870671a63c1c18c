//! Sensor sampling interface and fixed-point measurement types
//!
//! The hardware driver itself is an external collaborator; this module owns
//! the contract it must present: a synchronous fetch of one atomic sample set
//! per loop iteration. Readings are fixed-point pairs rather than floats, so
//! the encoder controls decimal rendering exactly.

pub mod simulated;

pub use simulated::SimulatedSensor;

use thiserror::Error;

/// A signed fixed-point reading: integer part plus fractional micro-units.
///
/// The sign of the reading is carried by the pair as a whole; for values in
/// (-1, 0) the integer part is zero and only `micros` is negative. The
/// encoder renders the fractional token as an absolute magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Measurement {
    /// Integer part of the value
    pub integer: i32,
    /// Fractional part in millionths, |micros| <= 999_999
    pub micros: i32,
}

impl Measurement {
    pub fn new(integer: i32, micros: i32) -> Self {
        Self { integer, micros }
    }

    /// Convert from a float, as simulated drivers produce.
    ///
    /// Rounding the fractional part can overflow a full unit (e.g.
    /// 29.9999995 rounds to a million micros); the overflow carries into
    /// the integer part so `|micros|` stays below one million.
    pub fn from_f64(value: f64) -> Self {
        let mut integer = value.trunc() as i32;
        let mut micros = ((value - value.trunc()) * 1_000_000.0).round() as i32;
        if micros.abs() == 1_000_000 {
            integer += micros.signum();
            micros = 0;
        }
        Self { integer, micros }
    }

    pub fn as_f64(&self) -> f64 {
        self.integer as f64 + self.micros as f64 / 1_000_000.0
    }
}

/// One atomic set of readings, created fresh each loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleSet {
    pub temperature: Measurement,
    pub pressure: Option<Measurement>,
    pub humidity: Option<Measurement>,
}

/// Sensor access failures
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor fetch failed: {0}")]
    FetchFailed(String),
    #[error("sensor channel unavailable: {0}")]
    ChannelUnavailable(&'static str),
    #[error("sensor device not ready")]
    NotReady,
}

/// Contract presented by a bound sensor device
///
/// `sample` triggers a fetch-then-read sequence across the device's channels
/// and returns them as one sample set. Readiness is checked once at startup;
/// an unready device is logged, not fatal.
pub trait SensorReader: Send {
    /// Whether the underlying device initialized successfully
    fn is_ready(&self) -> bool;

    /// Fetch and read one atomic sample set
    fn sample(&mut self) -> Result<SampleSet, SensorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_from_f64_positive() {
        let m = Measurement::from_f64(21.5);
        assert_eq!(m.integer, 21);
        assert_eq!(m.micros, 500_000);
    }

    #[test]
    fn test_measurement_from_f64_negative() {
        let m = Measurement::from_f64(-12.345678);
        assert_eq!(m.integer, -12);
        assert_eq!(m.micros, -345_678);
    }

    #[test]
    fn test_measurement_from_f64_small_negative() {
        // Values in (-1, 0) carry the sign only in the fractional part
        let m = Measurement::from_f64(-0.25);
        assert_eq!(m.integer, 0);
        assert_eq!(m.micros, -250_000);
    }

    #[test]
    fn test_measurement_from_f64_carries_fraction_overflow() {
        // Rounding 0.9999995 up must carry into the integer part, never
        // produce a seven-digit fraction
        let m = Measurement::from_f64(29.9999995);
        assert_eq!(m.integer, 30);
        assert_eq!(m.micros, 0);

        let m = Measurement::from_f64(-29.9999995);
        assert_eq!(m.integer, -30);
        assert_eq!(m.micros, 0);

        let m = Measurement::from_f64(0.9999999);
        assert_eq!(m.integer, 1);
        assert_eq!(m.micros, 0);
    }

    #[test]
    fn test_measurement_micros_stay_in_range() {
        for v in [29.9999995, -29.9999995, 0.49999999, 30.0, 17.5000005] {
            let m = Measurement::from_f64(v);
            assert!(
                m.micros.abs() < 1_000_000,
                "micros {} out of range for input {v}",
                m.micros
            );
        }
    }

    #[test]
    fn test_measurement_round_trip() {
        for v in [0.0, 21.5, -3.125, 1013.2, -0.000001] {
            let m = Measurement::from_f64(v);
            assert!((m.as_f64() - v).abs() < 1e-6, "round trip failed for {v}");
        }
    }

    #[test]
    fn test_sample_set_default_has_no_optional_channels() {
        let s = SampleSet::default();
        assert!(s.pressure.is_none());
        assert!(s.humidity.is_none());
    }
}
