//! MQTT transport over an embassy-net TCP socket
//!
//! The rust-mqtt client borrows its buffers and socket, so a client value is
//! built for each operation on top of the long-lived socket. Only QoS 0 is
//! used, so no packet state has to survive between operations.

use core::fmt::Write;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, TcpSocket};
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_time::{Duration, Instant, with_timeout};
use heapless::String;
use log::{debug, info, warn};
use respira_core::config::BrokerConfig;
use respira_core::link::{InboundMessage, Transport};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;
use static_cell::StaticCell;
use thiserror_no_std::Error;

pub const MQTT_KEEP_ALIVE_SECS: u16 = 60;

const MQTT_BUFFER_LEN: usize = 1024;
const TCP_BUFFER_LEN: usize = 2048;
const MAX_PROPERTIES: usize = 5;

/// Socket inactivity limit; a dead broker surfaces as an I/O error.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for reading one inbound packet that has started to arrive.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);

static TCP_RX: StaticCell<[u8; TCP_BUFFER_LEN]> = StaticCell::new();
static TCP_TX: StaticCell<[u8; TCP_BUFFER_LEN]> = StaticCell::new();
static MQTT_WRITE: StaticCell<[u8; MQTT_BUFFER_LEN]> = StaticCell::new();
static MQTT_RECV: StaticCell<[u8; MQTT_BUFFER_LEN]> = StaticCell::new();

#[derive(Error, Debug)]
pub enum MqttLinkError {
    #[error("broker address could not be resolved")]
    Dns,
    #[error("TCP connection failed: {0:?}")]
    Tcp(ConnectError),
    #[error("MQTT error: {0:?}")]
    Mqtt(ReasonCode),
    #[error("no broker session")]
    NotConnected,
    #[error("value does not fit its buffer")]
    Capacity,
}

/// Broker session state kept across operations.
struct Session {
    client_id: String<32>,
    username: String<64>,
    password: String<64>,
}

pub struct MqttLink {
    stack: Stack<'static>,
    socket: TcpSocket<'static>,
    write_buf: &'static mut [u8; MQTT_BUFFER_LEN],
    recv_buf: &'static mut [u8; MQTT_BUFFER_LEN],
    session: Session,
    connected: bool,
    last_activity: Instant,
}

impl MqttLink {
    /// Create the link. Must be called once; the buffers are static.
    pub fn new(stack: Stack<'static>) -> Self {
        let rx = TCP_RX.init([0; TCP_BUFFER_LEN]);
        let tx = TCP_TX.init([0; TCP_BUFFER_LEN]);

        Self {
            stack,
            socket: TcpSocket::new(stack, rx, tx),
            write_buf: MQTT_WRITE.init([0; MQTT_BUFFER_LEN]),
            recv_buf: MQTT_RECV.init([0; MQTT_BUFFER_LEN]),
            session: Session {
                client_id: String::new(),
                username: String::new(),
                password: String::new(),
            },
            connected: false,
            last_activity: Instant::now(),
        }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddress, MqttLinkError> {
        if let Ok(ip) = host.parse::<Ipv4Address>() {
            return Ok(IpAddress::Ipv4(ip));
        }

        let addresses = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                warn!("DNS query for {} failed: {:?}", host, e);
                MqttLinkError::Dns
            })?;

        addresses.first().copied().ok_or(MqttLinkError::Dns)
    }

    fn remember(&mut self, broker: &BrokerConfig<'_>, client_id: &str) -> Result<(), MqttLinkError> {
        self.session.client_id.clear();
        self.session.username.clear();
        self.session.password.clear();

        write!(self.session.client_id, "{}", client_id).map_err(|_| MqttLinkError::Capacity)?;
        if let Some(credentials) = broker.credentials {
            write!(self.session.username, "{}", credentials.username)
                .map_err(|_| MqttLinkError::Capacity)?;
            write!(self.session.password, "{}", credentials.password)
                .map_err(|_| MqttLinkError::Capacity)?;
        }
        Ok(())
    }

    fn ping_due(&self) -> bool {
        self.last_activity.elapsed() >= Duration::from_secs(MQTT_KEEP_ALIVE_SECS as u64 / 2)
    }
}

/// A rust-mqtt client borrowing the link's socket and buffers.
fn client<'a>(
    socket: &'a mut TcpSocket<'static>,
    write_buf: &'a mut [u8],
    recv_buf: &'a mut [u8],
    session: &'a Session,
) -> MqttClient<'a, &'a mut TcpSocket<'static>, MAX_PROPERTIES, CountingRng> {
    let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
    config.add_client_id(&session.client_id);
    config.add_max_subscribe_qos(QualityOfService::QoS0);
    config.keep_alive = MQTT_KEEP_ALIVE_SECS;
    if !session.username.is_empty() {
        config.add_username(&session.username);
        config.add_password(&session.password);
    }

    let write_len = write_buf.len();
    let recv_len = recv_buf.len();
    MqttClient::new(socket, write_buf, write_len, recv_buf, recv_len, config)
}

impl Transport for MqttLink {
    type Error = MqttLinkError;

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(
        &mut self,
        broker: &BrokerConfig<'_>,
        client_id: &str,
    ) -> Result<(), Self::Error> {
        self.connected = false;
        self.socket.abort();
        let _ = self.socket.flush().await;

        self.remember(broker, client_id)?;
        let address = self.resolve(broker.host).await?;

        self.socket.set_timeout(Some(SOCKET_TIMEOUT));
        self.socket
            .connect((address, broker.port))
            .await
            .map_err(MqttLinkError::Tcp)?;
        debug!("TCP connected to {}:{}", address, broker.port);

        let mut mqtt = client(
            &mut self.socket,
            &mut self.write_buf[..],
            &mut self.recv_buf[..],
            &self.session,
        );
        mqtt.connect_to_broker().await.map_err(MqttLinkError::Mqtt)?;

        info!("MQTT session open as {}", client_id);
        self.connected = true;
        self.last_activity = Instant::now();
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MqttLinkError::NotConnected);
        }

        let mut mqtt = client(
            &mut self.socket,
            &mut self.write_buf[..],
            &mut self.recv_buf[..],
            &self.session,
        );
        let result = mqtt.subscribe_to_topic(topic).await;
        drop(mqtt);

        self.last_activity = Instant::now();
        result.map_err(|code| {
            self.connected = false;
            MqttLinkError::Mqtt(code)
        })
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MqttLinkError::NotConnected);
        }

        let mut mqtt = client(
            &mut self.socket,
            &mut self.write_buf[..],
            &mut self.recv_buf[..],
            &self.session,
        );
        let result = mqtt
            .send_message(topic, payload, QualityOfService::QoS0, false)
            .await;
        drop(mqtt);

        self.last_activity = Instant::now();
        match result {
            Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => Ok(()),
            Err(code) => {
                self.connected = false;
                Err(MqttLinkError::Mqtt(code))
            }
        }
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, Self::Error> {
        if !self.connected {
            return Ok(None);
        }

        if self.ping_due() {
            let mut mqtt = client(
                &mut self.socket,
                &mut self.write_buf[..],
                &mut self.recv_buf[..],
                &self.session,
            );
            let result = mqtt.send_ping().await;
            drop(mqtt);

            if let Err(code) = result {
                self.connected = false;
                return Err(MqttLinkError::Mqtt(code));
            }
            self.last_activity = Instant::now();
        }

        if !self.socket.can_recv() {
            return Ok(None);
        }

        let mut mqtt = client(
            &mut self.socket,
            &mut self.write_buf[..],
            &mut self.recv_buf[..],
            &self.session,
        );
        let message = match with_timeout(RECEIVE_TIMEOUT, mqtt.receive_message()).await {
            Ok(Ok((topic, payload))) => {
                let mut message = InboundMessage {
                    topic: String::new(),
                    payload: heapless::Vec::new(),
                };
                if message.topic.push_str(topic).is_err()
                    || message.payload.extend_from_slice(payload).is_err()
                {
                    warn!("Dropping oversized message on {}", topic);
                    None
                } else {
                    Some(message)
                }
            }
            Ok(Err(code)) => {
                drop(mqtt);
                self.connected = false;
                return Err(MqttLinkError::Mqtt(code));
            }
            Err(_) => None,
        };

        self.last_activity = Instant::now();
        Ok(message)
    }
}
