//! Measurement report and system status messages
//!
//! Payloads are written by hand into bounded strings; the key order of the
//! report is fixed and consumed as-is by the backend.

use core::fmt::Write;

use heapless::String;
use thiserror_no_std::Error;

/// Capacity of a serialized measurement report.
pub const REPORT_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("report does not fit in {capacity} bytes")]
    Overflow { capacity: usize },
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
}

/// Status strings published on the system topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    Connected,
    Co2SensorUnavailable,
    ClimateSensorUnavailable,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Connected => "connected",
            SystemStatus::Co2SensorUnavailable => "No response from CO2 sensor",
            SystemStatus::ClimateSensorUnavailable => "No response from climate sensor",
        }
    }
}

/// One transmitted measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementReport<'a> {
    pub owner: &'a str,
    pub device: &'a str,
    pub temperature: f32,
    pub humidity: f32,
    pub co2: u16,
}

impl MeasurementReport<'_> {
    /// Serialize as
    /// `{"owner":"..","device":"..","temperature":x.xx,"humidity":x.xx,"co2":n}`.
    ///
    /// `"` and `\` in the owner are escaped so the payload stays valid JSON;
    /// topics keep the owner unescaped.
    pub fn to_json(&self) -> Result<String<REPORT_CAPACITY>, TelemetryError> {
        if !self.temperature.is_finite() {
            return Err(TelemetryError::NonFinite {
                field: "temperature",
            });
        }
        if !self.humidity.is_finite() {
            return Err(TelemetryError::NonFinite { field: "humidity" });
        }

        let overflow = |_| TelemetryError::Overflow {
            capacity: REPORT_CAPACITY,
        };

        let mut json = String::new();
        json.push_str("{\"owner\":\"").map_err(overflow)?;
        push_escaped(&mut json, self.owner)?;
        json.push_str("\",\"device\":\"").map_err(overflow)?;
        push_escaped(&mut json, self.device)?;
        write!(
            json,
            "\",\"temperature\":{:.2},\"humidity\":{:.2},\"co2\":{}}}",
            self.temperature, self.humidity, self.co2
        )
        .map_err(|_| TelemetryError::Overflow {
            capacity: REPORT_CAPACITY,
        })?;

        Ok(json)
    }
}

fn push_escaped(out: &mut String<REPORT_CAPACITY>, value: &str) -> Result<(), TelemetryError> {
    for c in value.chars() {
        let pushed = match c {
            '"' | '\\' => out.push('\\').and_then(|_| out.push(c)),
            _ => out.push(c),
        };
        pushed.map_err(|_| TelemetryError::Overflow {
            capacity: REPORT_CAPACITY,
        })?;
    }
    Ok(())
}
