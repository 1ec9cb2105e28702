//! Provisioning record compiled in by `build.rs`

use respira_core::config::{ConfigError, InternetConfig, Provisioning};

const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};

const WIFI_PASSWORD: &str = match option_env!("WIFI_PASSWORD") {
    Some(password) => password,
    None => "",
};

const OWNER: &str = match option_env!("RESPIRA_OWNER") {
    Some(owner) => owner,
    None => "",
};

/// The record the firmware was built with.
pub fn load() -> Result<Provisioning<'static>, ConfigError> {
    Provisioning::new(
        OWNER,
        InternetConfig {
            ssid: WIFI_SSID,
            password: WIFI_PASSWORD,
        },
    )
}

pub fn is_complete(record: &Provisioning<'_>) -> bool {
    !record.owner.is_empty() && !record.internet.ssid.is_empty()
}
