//! Remote control commands received on the control topic

use log::{info, warn};

use crate::link::InboundHandler;

/// Device actions a command can trigger.
pub trait DeviceControl {
    /// Restart the device. Does not return on hardware.
    fn restart(&mut self);

    /// Forget the stored provisioning record (owner and network credentials).
    fn clear_provisioning(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restart,
    FactoryReset,
}

impl Command {
    pub const RESTART: &'static str = "restart";
    pub const FACTORY_RESET: &'static str = "factory-reset";

    /// Case-insensitive exact match; anything else is not a command.
    pub fn parse(payload: &str) -> Option<Self> {
        if payload.eq_ignore_ascii_case(Self::RESTART) {
            Some(Command::Restart)
        } else if payload.eq_ignore_ascii_case(Self::FACTORY_RESET) {
            Some(Command::FactoryReset)
        } else {
            None
        }
    }
}

/// Routes control-topic payloads to device actions.
pub struct CommandDispatcher<'a, D> {
    control_topic: &'a str,
    device: D,
}

impl<'a, D: DeviceControl> CommandDispatcher<'a, D> {
    pub fn new(control_topic: &'a str, device: D) -> Self {
        Self {
            control_topic,
            device,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Restart => {
                info!("Restart requested");
                self.device.restart();
            }
            Command::FactoryReset => {
                info!("Factory reset requested");
                self.device.clear_provisioning();
                self.device.restart();
            }
        }
    }
}

impl<D: DeviceControl> InboundHandler for CommandDispatcher<'_, D> {
    fn on_message(&mut self, topic: &str, payload: &str) {
        info!("Message arrived on {}: {}", topic, payload);

        if topic != self.control_topic {
            warn!("Ignoring message on unexpected topic {}", topic);
            return;
        }

        match Command::parse(payload) {
            Some(command) => self.execute(command),
            None => warn!("Unknown command '{}'", payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DeviceAction, FakeDevice};

    const CONTROL: &str = "respira-indoor/a@b.com/AABBCCDDEEFF/control";

    fn dispatch(topic: &str, payload: &str) -> FakeDevice {
        let mut dispatcher = CommandDispatcher::new(CONTROL, FakeDevice::default());
        dispatcher.on_message(topic, payload);
        dispatcher.device
    }

    #[test]
    fn restart_is_case_insensitive() {
        assert_eq!(dispatch(CONTROL, "RESTART").actions, [DeviceAction::Restart]);
        assert_eq!(dispatch(CONTROL, "Restart").actions, [DeviceAction::Restart]);
    }

    #[test]
    fn restart_must_match_exactly() {
        assert!(dispatch(CONTROL, "restart-now").actions.is_empty());
        assert!(dispatch(CONTROL, " restart").actions.is_empty());
        assert!(dispatch(CONTROL, "").actions.is_empty());
    }

    #[test]
    fn factory_reset_clears_then_restarts() {
        assert_eq!(
            dispatch(CONTROL, "Factory-Reset").actions,
            [DeviceAction::ClearProvisioning, DeviceAction::Restart]
        );
    }

    #[test]
    fn other_topics_are_ignored() {
        assert!(dispatch("respira-indoor/x/y/control", "restart").actions.is_empty());
    }

    #[test]
    fn parse_recognizes_both_commands() {
        assert_eq!(Command::parse("restart"), Some(Command::Restart));
        assert_eq!(Command::parse("FACTORY-RESET"), Some(Command::FactoryReset));
        assert_eq!(Command::parse("reset"), None);
    }
}
