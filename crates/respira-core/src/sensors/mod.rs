//! Sensor traits and errors
//!
//! The CO2 sensor is read through its PWM output ([`PulseSource`]); temperature
//! and humidity come from a separate [`ClimateSensor`].

mod pwm_co2;

pub use pwm_co2::*;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: no response after {attempts} attempts")]
    Timeout { sensor: &'static str, attempts: u8 },
}

/// A digital input carrying a duty-cycle encoded measurement.
pub trait PulseSource {
    /// Width of the next high pulse in microseconds, or `0` when no pulse was seen.
    fn high_pulse_micros(&mut self) -> impl Future<Output = u32>;
}

/// Ambient readings sent alongside the CO2 value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReadings {
    pub temperature_celsius: f32,
    pub humidity_percent: f32,
}

/// Trait for the temperature/humidity sensor.
pub trait ClimateSensor {
    fn read(&mut self) -> impl Future<Output = Result<ClimateReadings, SensorError>>;
}
