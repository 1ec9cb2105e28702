use core::fmt::Write;

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use heapless::String;
use log::{debug, error, info, warn};

use super::{ConnectionState, InboundHandler, Transport};
use crate::config::{
    BrokerConfig, INDICATOR_BLINK_HALF, RECONNECT_BACKOFF, RECONNECT_MAX_ATTEMPTS,
};
use crate::identity::Topic;

/// Keeps one broker session alive and routes inbound messages.
///
/// Reconnection never blocks: a failed handshake records when the next one is
/// allowed and every later call to [`ConnectionManager::handle`] checks it.
/// While waiting, the status indicator is high for the first half of the
/// backoff and low for the second.
pub struct ConnectionManager<'a, T, H, L> {
    transport: T,
    broker: BrokerConfig<'a>,
    client_id: Option<String<32>>,
    control_topic: Option<Topic>,
    handler: Option<H>,
    indicator: L,
    state: ConnectionState,
    attempts: u8,
    next_attempt: Option<Instant>,
}

impl<'a, T, H, L> ConnectionManager<'a, T, H, L>
where
    T: Transport,
    H: InboundHandler,
    L: OutputPin,
{
    pub fn new(transport: T, broker: BrokerConfig<'a>, indicator: L) -> Self {
        Self {
            transport,
            broker,
            client_id: None,
            control_topic: None,
            handler: None,
            indicator,
            state: ConnectionState::Disconnected,
            attempts: 0,
            next_attempt: None,
        }
    }

    /// Install the inbound handler, replacing any previous one.
    pub fn attach_handler(&mut self, handler: H) {
        self.handler = Some(handler);
    }

    /// Record the control topic. Only one is kept; it is (re-)subscribed on
    /// every successful handshake.
    pub fn subscribe(&mut self, topic: &str) -> bool {
        let mut stored = Topic::new();
        if stored.push_str(topic).is_err() {
            warn!("Control topic '{}' does not fit, ignoring", topic);
            return false;
        }
        self.control_topic = Some(stored);
        true
    }

    /// Record the client id and run the first connection attempt.
    pub async fn begin(&mut self, client_id: &str, now: Instant) -> bool {
        let mut id = String::new();
        if write!(id, "{}", client_id).is_err() {
            error!("Client id '{}' is too long", client_id);
            return false;
        }
        self.client_id = Some(id);

        if self.handler.is_none() {
            debug!("No inbound handler attached, messages will be dropped");
        }

        self.handle(now).await == ConnectionState::Connected
    }

    /// Reconnect if the session is down, then service the transport once.
    pub async fn handle(&mut self, now: Instant) -> ConnectionState {
        if self.transport.is_connected() {
            self.state = ConnectionState::Connected;
        } else {
            if self.state == ConnectionState::Connected {
                warn!("Broker session lost");
            }
            self.reconnect(now).await;
        }

        self.service().await;
        self.state
    }

    /// One step of the reconnection state machine.
    pub async fn reconnect(&mut self, now: Instant) -> ConnectionState {
        if self.transport.is_connected() {
            self.state = ConnectionState::Connected;
            return self.state;
        }

        let Some(client_id) = self.client_id.as_ref() else {
            warn!("Reconnect requested before begin()");
            self.state = ConnectionState::Disconnected;
            return self.state;
        };

        if self.state != ConnectionState::Connecting {
            info!(
                "Connecting to broker {}:{} as {}",
                self.broker.host, self.broker.port, client_id
            );
            self.state = ConnectionState::Connecting;
            self.attempts = 0;
            self.next_attempt = None;
        }

        if let Some(at) = self.next_attempt {
            if now < at {
                let remaining = at - now;
                // High during the first half of the backoff, low during the second
                let _ = if remaining > RECONNECT_BACKOFF - INDICATOR_BLINK_HALF {
                    self.indicator.set_high()
                } else {
                    self.indicator.set_low()
                };
                return self.state;
            }
        }

        match self.transport.connect(&self.broker, client_id).await {
            Ok(()) => {
                info!("Broker session established");
                self.attempts = 0;
                self.next_attempt = None;
                if let Some(topic) = self.control_topic.as_ref() {
                    match self.transport.subscribe(topic).await {
                        Ok(()) => info!("Subscribed to {}", topic),
                        Err(e) => warn!("Subscribe to {} failed: {:?}", topic, e),
                    }
                }
                let _ = self.indicator.set_low();
                self.state = ConnectionState::Connected;
            }
            Err(e) => {
                self.attempts += 1;
                if self.attempts >= RECONNECT_MAX_ATTEMPTS {
                    error!(
                        "Broker unreachable after {} attempts: {:?}",
                        self.attempts, e
                    );
                    self.next_attempt = None;
                    let _ = self.indicator.set_low();
                    self.state = ConnectionState::TimedOut;
                } else {
                    warn!(
                        "Broker handshake failed ({}/{}): {:?}, retrying in {} ms",
                        self.attempts,
                        RECONNECT_MAX_ATTEMPTS,
                        e,
                        RECONNECT_BACKOFF.as_millis()
                    );
                    self.next_attempt = Some(now + RECONNECT_BACKOFF);
                    let _ = self.indicator.set_high();
                }
            }
        }

        self.state
    }

    /// Fire-and-forget publish. Failures are logged and dropped.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) {
        if !self.transport.is_connected() {
            debug!("Not connected, dropping {} bytes for {}", payload.len(), topic);
            return;
        }

        if let Err(e) = self.transport.publish(topic, payload).await {
            debug!("Publish to {} dropped: {:?}", topic, e);
        }
    }

    async fn service(&mut self) {
        match self.transport.poll().await {
            Ok(Some(message)) => match self.handler.as_mut() {
                Some(handler) => handler.on_message(&message.topic, message.payload_str()),
                None => debug!("No handler, dropping message on {}", message.topic),
            },
            Ok(None) => {}
            Err(e) => {
                warn!("Broker poll failed: {:?}", e);
                if self.state == ConnectionState::Connected {
                    self.state = ConnectionState::Disconnected;
                }
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn indicator(&mut self) -> &mut L {
        &mut self.indicator
    }

    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
