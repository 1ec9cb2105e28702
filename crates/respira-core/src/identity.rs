//! Device identity and MQTT topic set
//!
//! Both are built once during boot and then only borrowed.

use core::fmt::Write;

use heapless::String;
use thiserror_no_std::Error;

use crate::config::APP_NAME;

/// Capacity of every topic string.
pub const TOPIC_CAPACITY: usize = 128;

/// Twelve uppercase hex digits.
pub const DEVICE_ID_LEN: usize = 12;

pub type Topic = String<TOPIC_CAPACITY>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    #[error("topic for suffix '{suffix}' exceeds {max} bytes")]
    TopicTooLong { suffix: &'static str, max: usize },
    #[error("hostname exceeds its buffer")]
    HostnameTooLong,
}

/// Normalized hardware address of the node.
///
/// Used as the MQTT client identifier and embedded in topics and payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    hex: String<DEVICE_ID_LEN>,
}

impl DeviceIdentity {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut hex = String::new();
        for byte in mac {
            // 6 bytes always fit in 12 hex digits
            let _ = write!(hex, "{:02X}", byte);
        }
        Self { hex }
    }

    pub fn as_str(&self) -> &str {
        self.hex.as_str()
    }

    /// Name announced while joining the network, e.g. `respira-indoor AABBCCDDEEFF`.
    pub fn hostname(&self) -> Result<String<32>, IdentityError> {
        let mut name = String::new();
        write!(name, "{} {}", APP_NAME, self.hex).map_err(|_| IdentityError::HostnameTooLong)?;
        Ok(name)
    }
}

impl core::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.hex)
    }
}

/// The three topics of a node: `<main>/<owner>/<device>/{system,network,control}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    system: Topic,
    telemetry: Topic,
    control: Topic,
}

impl TopicSet {
    pub const SYSTEM_SUFFIX: &'static str = "system";
    pub const TELEMETRY_SUFFIX: &'static str = "network";
    pub const CONTROL_SUFFIX: &'static str = "control";

    pub fn new(
        main_topic: &str,
        owner: &str,
        device: &DeviceIdentity,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            system: build_topic(main_topic, owner, device, Self::SYSTEM_SUFFIX)?,
            telemetry: build_topic(main_topic, owner, device, Self::TELEMETRY_SUFFIX)?,
            control: build_topic(main_topic, owner, device, Self::CONTROL_SUFFIX)?,
        })
    }

    /// Outbound status strings.
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Outbound measurement reports.
    pub fn telemetry(&self) -> &str {
        &self.telemetry
    }

    /// Inbound commands.
    pub fn control(&self) -> &str {
        &self.control
    }
}

fn build_topic(
    main_topic: &str,
    owner: &str,
    device: &DeviceIdentity,
    suffix: &'static str,
) -> Result<Topic, IdentityError> {
    let mut topic = String::new();
    write!(topic, "{}/{}/{}/{}", main_topic, owner, device, suffix).map_err(|_| {
        IdentityError::TopicTooLong {
            suffix,
            max: TOPIC_CAPACITY,
        }
    })?;
    Ok(topic)
}
