//! Node configuration
//!
//! Build-time constants for the respira-indoor node, the runtime view of them
//! handed to the core (`NodeConfig`), and the provisioning record that the
//! device keeps in non-volatile storage.

use alloc::vec::Vec;

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Application name, used for the provisioning hostname.
pub const APP_NAME: &str = "respira-indoor";

/// CO2 sampling interval (msec)
pub const SAMPLING_INTERVAL_MS: u32 = 10_000;

/// Transmission interval (msec)
pub const TX_INTERVAL_MS: u32 = 300_000;

/// CO2 full-scale range of the sensor in ppm
pub const CO2_PPM_RANGE: u16 = 5000;

pub const MQTT_BROKER: &str = "mqtt-respira-indoor.inubo.es";
pub const MQTT_PORT: u16 = 1883;
pub const MQTT_MAIN_TOPIC: &str = "respira-indoor";

/// Maximum length of the owner identity (an e-mail address).
pub const OWNER_MAX_LEN: usize = 63;

/// Number of pulse measurements attempted before the CO2 sensor is declared unavailable.
pub const SENSOR_MAX_ATTEMPTS: u8 = 10;

/// Spacing between pulse measurements while the sensor is not answering.
pub const SENSOR_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Number of broker handshakes attempted before the link reports a timeout.
pub const RECONNECT_MAX_ATTEMPTS: u8 = 6;

/// Backoff between two failed broker handshakes.
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(5000);

/// The status indicator is driven high for this long at the start of each
/// backoff, and low for the remainder.
pub const INDICATOR_BLINK_HALF: Duration = Duration::from_millis(2500);

/// How long the node waits for the initial network association before restarting.
pub const PORTAL_TIMEOUT: Duration = Duration::from_secs(300);

/// The smallest window for which dropping one minimum and one maximum leaves a sample.
pub const MIN_WINDOW_CAPACITY: usize = 3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sampling interval must be non-zero")]
    ZeroSamplingInterval,
    #[error("aggregation window of {capacity} samples is too small (need at least 3)")]
    WindowTooSmall { capacity: usize },
    #[error("owner identity is longer than {max} bytes")]
    OwnerTooLong { max: usize },
    #[error("provisioning record could not be encoded or decoded")]
    Provisioning,
}

/// Optional username/password for an authenticated broker session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Remote broker endpoint. Sessions are anonymous unless `credentials` is set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    #[serde(borrow)]
    pub credentials: Option<Credentials<'a>>,
}

impl Default for BrokerConfig<'_> {
    fn default() -> Self {
        Self {
            host: MQTT_BROKER,
            port: MQTT_PORT,
            credentials: None,
        }
    }
}

/// Runtime view of the node constants.
///
/// The firmware always runs with [`NodeConfig::default`]; the simulator shortens
/// the intervals so a full transmission cycle fits in a few seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct NodeConfig<'a> {
    pub sampling_interval_ms: u32,
    pub tx_interval_ms: u32,
    pub co2_range_ppm: u16,
    pub main_topic: &'a str,
    #[serde(borrow)]
    pub broker: BrokerConfig<'a>,
}

impl Default for NodeConfig<'_> {
    fn default() -> Self {
        Self {
            sampling_interval_ms: SAMPLING_INTERVAL_MS,
            tx_interval_ms: TX_INTERVAL_MS,
            co2_range_ppm: CO2_PPM_RANGE,
            main_topic: MQTT_MAIN_TOPIC,
            broker: BrokerConfig::default(),
        }
    }
}

impl NodeConfig<'_> {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms as u64)
    }

    /// Number of samples aggregated into one transmitted value.
    pub fn window_capacity(&self) -> usize {
        self.tx_interval_ms
            .checked_div(self.sampling_interval_ms)
            .unwrap_or(0) as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_interval_ms == 0 {
            return Err(ConfigError::ZeroSamplingInterval);
        }

        let capacity = self.window_capacity();
        if capacity < MIN_WINDOW_CAPACITY {
            return Err(ConfigError::WindowTooSmall { capacity });
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Everything the provisioning step stores on the device.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct Provisioning<'a> {
    /// Owner identity (e-mail address), used verbatim in topics and payloads.
    pub owner: &'a str,
    #[serde(borrow)]
    pub internet: InternetConfig<'a>,
}

impl<'a> Provisioning<'a> {
    pub fn new(owner: &'a str, internet: InternetConfig<'a>) -> Result<Self, ConfigError> {
        if owner.len() > OWNER_MAX_LEN {
            return Err(ConfigError::OwnerTooLong { max: OWNER_MAX_LEN });
        }
        Ok(Self { owner, internet })
    }

    /// Encode the record into the blob written to non-volatile storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Provisioning)
    }

    /// Decode a stored blob. The returned record borrows its strings from `bytes`.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, ConfigError> {
        let record: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Provisioning)?;
        if record.owner.len() > OWNER_MAX_LEN {
            return Err(ConfigError::OwnerTooLong { max: OWNER_MAX_LEN });
        }
        Ok(record)
    }
}
