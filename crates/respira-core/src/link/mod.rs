//! Broker link: transport abstraction and the connection state machine
//!
//! The core never talks to a socket directly. Firmware plugs in an MQTT client
//! over embassy-net, the simulator an in-process broker, tests a scripted fake.

mod connection;

pub use connection::*;

use core::convert::Infallible;
use core::fmt::Debug;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::config::BrokerConfig;
use crate::identity::TOPIC_CAPACITY;

/// Largest inbound payload kept by a transport. Commands are a few bytes.
pub const PAYLOAD_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    TimedOut,
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: heapless::String<TOPIC_CAPACITY>,
    pub payload: heapless::Vec<u8, PAYLOAD_CAPACITY>,
}

impl InboundMessage {
    /// Payload as text, cut at the first NUL byte.
    ///
    /// Invalid UTF-8 yields the longest valid prefix.
    pub fn payload_str(&self) -> &str {
        let bytes = match self.payload.iter().position(|&b| b == 0) {
            Some(end) => &self.payload[..end],
            None => &self.payload[..],
        };

        match core::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

/// Session-level operations of a publish/subscribe client.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Error: Debug;

    /// Liveness of the current session.
    fn is_connected(&self) -> bool;

    /// Open a new session with `broker`, identified by `client_id`.
    async fn connect(
        &mut self,
        broker: &BrokerConfig<'_>,
        client_id: &str,
    ) -> Result<(), Self::Error>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;

    /// Service the session once, returning at most one inbound message.
    async fn poll(&mut self) -> Result<Option<InboundMessage>, Self::Error>;
}

/// Receives messages delivered by the connection state machine.
pub trait InboundHandler {
    fn on_message(&mut self, topic: &str, payload: &str);
}

/// Indicator stand-in for hosts without a status LED.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

impl ErrorType for NoIndicator {
    type Error = Infallible;
}

impl OutputPin for NoIndicator {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: heapless::String::try_from("t").unwrap(),
            payload: heapless::Vec::from_slice(payload).unwrap(),
        }
    }

    #[test]
    fn payload_stops_at_first_nul() {
        assert_eq!(message(b"restart\0garbage").payload_str(), "restart");
        assert_eq!(message(b"restart").payload_str(), "restart");
        assert_eq!(message(b"\0restart").payload_str(), "");
    }

    #[test]
    fn invalid_utf8_keeps_valid_prefix() {
        assert_eq!(message(b"rest\xffart").payload_str(), "rest");
    }
}
