//! SHT40 adapter for the report's temperature and humidity fields

use embedded_hal_async::i2c::I2c;
use respira_core::sensors::{ClimateReadings, ClimateSensor, SensorError};
use sht4x::Sht4xAsync;

/// SHT40 on an async I2C bus, read once per transmission.
pub struct Sht40Climate<I> {
    sensor: Sht4xAsync<I, embassy_time::Delay>,
}

impl<I: I2c> Sht40Climate<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            sensor: Sht4xAsync::<I, embassy_time::Delay>::new(i2c),
        }
    }
}

impl<I: I2c> ClimateSensor for Sht40Climate<I> {
    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        let measurement = self
            .sensor
            .measure(sht4x::Precision::High, &mut embassy_time::Delay)
            .await
            .map_err(|e| {
                log::error!("SHT40 read failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "SHT40",
                    operation: "high-precision measurement",
                    details: "no valid frame on I2C",
                }
            })?;

        Ok(ClimateReadings {
            temperature_celsius: measurement.temperature_celsius().to_num::<f32>(),
            humidity_percent: measurement.humidity_percent().to_num::<f32>(),
        })
    }
}
