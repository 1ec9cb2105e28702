//! Application-wide run state and error types for respira-indoor

use thiserror_no_std::Error;

use crate::aggregator::AggregationError;
use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::sensors::SensorError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Booting,
    NetworkJoining,
    BrokerConnecting,
    Running,
    Restarting,
}

impl AppRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppRunState::Booting => "booting",
            AppRunState::NetworkJoining => "network joining",
            AppRunState::BrokerConnecting => "broker connecting",
            AppRunState::Running => "running",
            AppRunState::Restarting => "restarting",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WiFi connection failed: {0}")]
    Wifi(heapless::String<64>),
    #[error("Provisioning failed: {0}")]
    Provisioning(heapless::String<64>),
    #[error("Configuration error: {0}")]
    Config(ConfigError),
    #[error("Identity error: {0}")]
    Identity(IdentityError),
    #[error("Sensor error: {0}")]
    Sensor(SensorError),
    #[error("Aggregation error: {0}")]
    Aggregation(AggregationError),
    #[error("Telemetry error: {0}")]
    Telemetry(TelemetryError),
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e)
    }
}

impl From<IdentityError> for AppError {
    fn from(e: IdentityError) -> Self {
        AppError::Identity(e)
    }
}

impl From<SensorError> for AppError {
    fn from(e: SensorError) -> Self {
        AppError::Sensor(e)
    }
}

impl From<AggregationError> for AppError {
    fn from(e: AggregationError) -> Self {
        AppError::Aggregation(e)
    }
}

impl From<TelemetryError> for AppError {
    fn from(e: TelemetryError) -> Self {
        AppError::Telemetry(e)
    }
}

/// Build a bounded message string, truncating at a character boundary.
pub fn bounded_message<const N: usize>(message: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in message.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
