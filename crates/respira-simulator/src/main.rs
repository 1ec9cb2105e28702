//! Desktop simulator for the respira-indoor CO2 node.
//!
//! Runs the full respira-core pipeline (sampling, trimmed-mean aggregation,
//! broker link, command dispatch) against a synthetic PWM sensor and an
//! in-process broker. Published messages are logged.
//!
//! # Console input
//!
//! | Line            | Effect                                  |
//! |-----------------|-----------------------------------------|
//! | `restart`       | Control command, exits the simulator    |
//! | `factory-reset` | Control command, deletes provisioning   |
//! | `:drop`         | Drops the broker session                |
//! | anything else   | Delivered on the control topic as-is    |
//!
//! Run with `RUST_LOG=info` (or `debug`) to see the node's log output.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use embassy_futures::block_on;
use log::{error, info, warn};

use respira_core::commands::DeviceControl;
use respira_core::config::{BrokerConfig, CO2_PPM_RANGE, InternetConfig, NodeConfig, Provisioning};
use respira_core::identity::{DeviceIdentity, TopicSet};
use respira_core::link::{InboundMessage, NoIndicator, Transport};
use respira_core::node::{Node, NodeIdentity, NodeIo, TickOutcome};
use respira_core::sensors::{ClimateReadings, ClimateSensor, PulseSource, SensorError};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Sampling interval of the simulated node (msec).
const SIM_SAMPLING_INTERVAL_MS: u32 = 1_000;

/// Transmission interval of the simulated node (msec), ten samples per report.
const SIM_TX_INTERVAL_MS: u32 = 10_000;

/// Pause between two scheduler ticks.
const TICK_PERIOD: Duration = Duration::from_millis(50);

/// Locally administered MAC of the simulated node.
const SIM_MAC: [u8; 6] = [0x02, 0x52, 0x45, 0x53, 0x50, 0x49];

/// Number of broker handshakes refused at startup, to exercise the backoff.
const REFUSED_HANDSHAKES: usize = 2;

const DEFAULT_OWNER: &str = "simulator@respira.local";
const PROVISIONING_FILE: &str = "respira-provisioning.bin";

// ---------------------------------------------------------------------------
// Synthetic sensors
// ---------------------------------------------------------------------------

/// PWM source producing a slowly varying concentration with occasional spikes
/// and short stretches where the sensor does not answer.
struct SyntheticCo2 {
    reads: u64,
    range_ppm: u16,
}

impl SyntheticCo2 {
    fn new(range_ppm: u16) -> Self {
        Self {
            reads: 0,
            range_ppm,
        }
    }

    fn concentration(&self) -> f64 {
        let t = self.reads as f64;
        let base = 650.0 + 250.0 * (t / 40.0).sin() + 20.0 * (t / 7.0).cos();

        // One outlier in each direction every few dozen samples
        match self.reads % 23 {
            5 => base + 1500.0,
            17 => base * 0.2,
            _ => base,
        }
    }

    /// Inverse of the decoder: pulse width in microseconds for `ppm`.
    fn pulse_for(&self, ppm: f64) -> u32 {
        let range = self.range_ppm as f64;
        ((ppm * 1000.0 + 2.0 * range) / (range / 1000.0).floor()) as u32
    }
}

impl PulseSource for SyntheticCo2 {
    async fn high_pulse_micros(&mut self) -> u32 {
        self.reads += 1;

        // The sensor goes quiet for three reads out of every 97
        if self.reads % 97 < 3 {
            return 0;
        }

        self.pulse_for(self.concentration())
    }
}

struct SyntheticClimate {
    reads: u64,
}

impl ClimateSensor for SyntheticClimate {
    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        self.reads += 1;
        let t = self.reads as f64;

        // Temperature: 20-26 C, humidity: 40-60 %
        let temperature = 23.0 + 3.0 * (t / 12.0).sin() + 0.5 * (t / 3.7).cos();
        let humidity = 50.0 + 10.0 * (t / 18.0).sin() + 2.0 * (t / 2.3).cos();

        Ok(ClimateReadings {
            temperature_celsius: temperature as f32,
            humidity_percent: humidity as f32,
        })
    }
}

// ---------------------------------------------------------------------------
// In-process broker
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SimBrokerError {
    Refused,
    NotConnected,
    MessageTooLarge,
}

/// Broker session living in the simulator process.
///
/// Console lines are delivered as messages on the subscribed control topic.
struct InProcessBroker {
    connected: bool,
    refusals_left: usize,
    control_topic: Option<String>,
    console: Receiver<String>,
    pending: VecDeque<String>,
}

impl InProcessBroker {
    fn new(console: Receiver<String>) -> Self {
        Self {
            connected: false,
            refusals_left: REFUSED_HANDSHAKES,
            control_topic: None,
            console,
            pending: VecDeque::new(),
        }
    }
}

impl Transport for InProcessBroker {
    type Error = SimBrokerError;

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(
        &mut self,
        broker: &BrokerConfig<'_>,
        client_id: &str,
    ) -> Result<(), Self::Error> {
        if self.refusals_left > 0 {
            self.refusals_left -= 1;
            info!(
                "[broker] refusing {} at {}:{}",
                client_id, broker.host, broker.port
            );
            return Err(SimBrokerError::Refused);
        }

        info!("[broker] {} connected", client_id);
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        info!("[broker] subscribe {}", topic);
        self.control_topic = Some(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(SimBrokerError::NotConnected);
        }
        info!("[broker] {} <- {}", topic, String::from_utf8_lossy(payload));
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, Self::Error> {
        while let Ok(line) = self.console.try_recv() {
            if line.trim() == ":drop" {
                warn!("[broker] dropping session");
                self.connected = false;
                continue;
            }
            self.pending.push_back(line);
        }

        if !self.connected {
            return Ok(None);
        }

        let (Some(topic), Some(line)) = (self.control_topic.as_deref(), self.pending.pop_front())
        else {
            return Ok(None);
        };

        let mut message = InboundMessage {
            topic: heapless::String::new(),
            payload: heapless::Vec::new(),
        };
        message
            .topic
            .push_str(topic)
            .map_err(|_| SimBrokerError::MessageTooLarge)?;
        message
            .payload
            .extend_from_slice(line.trim_end().as_bytes())
            .map_err(|_| SimBrokerError::MessageTooLarge)?;

        Ok(Some(message))
    }
}

// ---------------------------------------------------------------------------
// Device control and provisioning
// ---------------------------------------------------------------------------

struct SimDevice {
    provisioning_path: PathBuf,
}

impl DeviceControl for SimDevice {
    fn restart(&mut self) {
        info!("Restart requested, exiting simulator");
        std::process::exit(0);
    }

    fn clear_provisioning(&mut self) {
        match std::fs::remove_file(&self.provisioning_path) {
            Ok(()) => info!("Removed {}", self.provisioning_path.display()),
            Err(e) => warn!(
                "Could not remove {}: {}",
                self.provisioning_path.display(),
                e
            ),
        }
    }
}

/// Load the stored provisioning blob, creating it on first run.
fn load_or_create_provisioning(path: &Path) -> Vec<u8> {
    if let Ok(blob) = std::fs::read(path) {
        if Provisioning::from_bytes(&blob).is_ok() {
            info!("Loaded provisioning from {}", path.display());
            return blob;
        }
        warn!("Ignoring unreadable provisioning in {}", path.display());
    }

    let owner = std::env::var("RESPIRA_OWNER").unwrap_or_else(|_| DEFAULT_OWNER.to_string());
    let blob = match Provisioning::new(&owner, InternetConfig::default())
        .and_then(|record| record.to_bytes())
    {
        Ok(blob) => blob,
        Err(e) => {
            error!("Invalid owner '{}': {}", owner, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::write(path, &blob) {
        warn!("Could not persist provisioning to {}: {}", path.display(), e);
    } else {
        info!("Provisioned owner {} into {}", owner, path.display());
    }
    blob
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("Starting respira-indoor simulator");

    let provisioning_path = std::env::var("RESPIRA_PROVISIONING")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(PROVISIONING_FILE));
    let blob = load_or_create_provisioning(&provisioning_path);
    let provisioning = match Provisioning::from_bytes(&blob) {
        Ok(record) => record,
        Err(e) => {
            error!("Provisioning unreadable: {}", e);
            std::process::exit(1);
        }
    };

    let device = DeviceIdentity::from_mac(SIM_MAC);
    match device.hostname() {
        Ok(hostname) => info!("Hostname: {}", hostname),
        Err(e) => warn!("Hostname unavailable: {}", e),
    }

    let config = NodeConfig {
        sampling_interval_ms: SIM_SAMPLING_INTERVAL_MS,
        tx_interval_ms: SIM_TX_INTERVAL_MS,
        ..NodeConfig::default()
    };

    let topics = match TopicSet::new(config.main_topic, provisioning.owner, &device) {
        Ok(topics) => topics,
        Err(e) => {
            error!("Cannot build topics: {}", e);
            std::process::exit(1);
        }
    };
    info!("Control topic: {}", topics.control());
    info!("Type 'restart', 'factory-reset' or ':drop' and press enter");

    // Console lines feed the in-process broker
    let (console_tx, console_rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if console_tx.send(line).is_err() {
                break;
            }
        }
    });

    let io = NodeIo {
        pulses: SyntheticCo2::new(CO2_PPM_RANGE),
        climate: SyntheticClimate { reads: 0 },
        transport: InProcessBroker::new(console_rx),
        device: SimDevice {
            provisioning_path: provisioning_path.clone(),
        },
        indicator: NoIndicator,
    };
    let identity = NodeIdentity {
        device: &device,
        owner: provisioning.owner,
        topics: &topics,
    };

    let mut node = match Node::new(config, identity, io) {
        Ok(node) => node,
        Err(e) => {
            error!("Invalid node configuration: {}", e);
            std::process::exit(1);
        }
    };

    let started = Instant::now();
    let now = || embassy_time::Instant::from_millis(started.elapsed().as_millis() as u64);

    block_on(node.start(now()));

    loop {
        match block_on(node.tick(now())) {
            TickOutcome::Transmitted(co2) => info!("Report sent, CO2 {} ppm", co2),
            TickOutcome::Sampled(ppm) => log::debug!(
                "Sample {} ppm ({}/{})",
                ppm,
                node.window().len(),
                node.window().capacity()
            ),
            TickOutcome::Serviced(_) | TickOutcome::SensorRetry => {}
            other => warn!("Tick: {:?}", other),
        }

        std::thread::sleep(TICK_PERIOD);
    }
}
