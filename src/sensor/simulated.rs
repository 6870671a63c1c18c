//! Simulated weather sensor for running without hardware
//!
//! Produces smooth sine-wave readings around plausible ambient values, which
//! makes live dashboards and end-to-end runs against a real broker usable
//! during development.

use super::{Measurement, SampleSet, SensorError, SensorReader};

/// Deterministic stand-in for a bound weather sensor
pub struct SimulatedSensor {
    tick: u64,
    weather: bool,
}

impl SimulatedSensor {
    /// Temperature-only device (single-value payload schema)
    pub fn temperature_only() -> Self {
        Self {
            tick: 0,
            weather: false,
        }
    }

    /// Full weather device: temperature, pressure and humidity channels
    pub fn weather() -> Self {
        Self {
            tick: 0,
            weather: true,
        }
    }

    fn wave(&self, center: f64, amplitude: f64, period: f64) -> f64 {
        center + amplitude * (self.tick as f64 / period).sin()
    }
}

impl SensorReader for SimulatedSensor {
    fn is_ready(&self) -> bool {
        true
    }

    fn sample(&mut self) -> Result<SampleSet, SensorError> {
        self.tick += 1;

        let temperature = Measurement::from_f64(self.wave(25.0, 5.0, 10.0));
        let (pressure, humidity) = if self.weather {
            (
                Some(Measurement::from_f64(self.wave(1013.25, 2.0, 30.0))),
                Some(Measurement::from_f64(self.wave(45.0, 10.0, 20.0))),
            )
        } else {
            (None, None)
        };

        Ok(SampleSet {
            temperature,
            pressure,
            humidity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_only_omits_weather_channels() {
        let mut sensor = SimulatedSensor::temperature_only();
        let sample = sensor.sample().unwrap();
        assert!(sample.pressure.is_none());
        assert!(sample.humidity.is_none());
    }

    #[test]
    fn test_weather_sensor_fills_all_channels() {
        let mut sensor = SimulatedSensor::weather();
        let sample = sensor.sample().unwrap();
        assert!(sample.pressure.is_some());
        assert!(sample.humidity.is_some());
    }

    #[test]
    fn test_readings_stay_in_plausible_bands() {
        let mut sensor = SimulatedSensor::weather();
        for _ in 0..100 {
            let sample = sensor.sample().unwrap();
            let temp = sample.temperature.as_f64();
            assert!((19.0..=31.0).contains(&temp), "temperature {temp} out of band");

            let pressure = sample.pressure.unwrap().as_f64();
            assert!((1010.0..=1017.0).contains(&pressure));

            let humidity = sample.humidity.unwrap().as_f64();
            assert!((34.0..=56.0).contains(&humidity));
        }
    }

    #[test]
    fn test_simulated_sensor_reports_ready() {
        assert!(SimulatedSensor::weather().is_ready());
    }
}
