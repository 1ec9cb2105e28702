use log::{info, warn};
use respira_core::app_state::AppRunState;
use respira_core::commands::DeviceControl;

/// Restart and provisioning hooks of the ESP32-S3.
pub struct EspDevice;

impl DeviceControl for EspDevice {
    fn restart(&mut self) {
        info!("Run state: {}", AppRunState::Restarting.as_str());
        esp_hal::system::software_reset();
    }

    fn clear_provisioning(&mut self) {
        // The record is compiled in; a new one needs a rebuild with new values
        warn!("Provisioning is build-time only, nothing stored to clear");
    }
}
