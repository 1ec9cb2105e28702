//! Cooperative scheduler of the node
//!
//! Each call to [`Node::tick`] runs exactly one branch: either a sampling step
//! (which may complete a window and transmit a report), or one round of
//! connection servicing. Nothing in here sleeps; the caller decides how often
//! to tick.

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use log::{error, info, warn};

use crate::aggregator::TrimmedMeanWindow;
use crate::app_state::{AppError, AppRunState};
use crate::commands::{CommandDispatcher, DeviceControl};
use crate::config::{ConfigError, NodeConfig};
use crate::identity::{DeviceIdentity, TopicSet};
use crate::link::{ConnectionManager, ConnectionState, Transport};
use crate::sensors::{ClimateSensor, Co2Sampler, PulseSource, SamplePoll};
use crate::telemetry::{MeasurementReport, SystemStatus};

/// Identity of the node, built once at boot and borrowed for its lifetime.
#[derive(Debug, Clone, Copy)]
pub struct NodeIdentity<'a> {
    pub device: &'a DeviceIdentity,
    pub owner: &'a str,
    pub topics: &'a TopicSet,
}

/// Hardware (or simulated hardware) the node drives.
pub struct NodeIo<S, C, T, D, L> {
    pub pulses: S,
    pub climate: C,
    pub transport: T,
    pub device: D,
    pub indicator: L,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A sample was registered; the window is not full yet.
    Sampled(u16),
    /// The window completed and a report with this CO2 value was published.
    Transmitted(u16),
    /// The window completed but no report could be built.
    TransmitFailed,
    /// The CO2 sensor did not answer; another attempt is scheduled.
    SensorRetry,
    /// The CO2 sensor exhausted its attempts; the slot was abandoned.
    SensorUnavailable,
    /// The connection was serviced.
    Serviced(ConnectionState),
}

pub struct Node<'a, S, C, T, D, L> {
    config: NodeConfig<'a>,
    identity: NodeIdentity<'a>,
    sampler: Co2Sampler<S>,
    climate: C,
    window: TrimmedMeanWindow,
    link: ConnectionManager<'a, T, CommandDispatcher<'a, D>, L>,
    device: Option<D>,
    last_sample: Option<Instant>,
    run_state: AppRunState,
    /// `connected` has been published for this boot.
    announced: bool,
}

impl<'a, S, C, T, D, L> Node<'a, S, C, T, D, L>
where
    S: PulseSource,
    C: ClimateSensor,
    T: Transport,
    D: DeviceControl,
    L: OutputPin,
{
    pub fn new(
        config: NodeConfig<'a>,
        identity: NodeIdentity<'a>,
        io: NodeIo<S, C, T, D, L>,
    ) -> Result<Self, ConfigError> {
        let window = TrimmedMeanWindow::from_config(&config)?;

        info!(
            "Node {}: sampling every {} ms, {} samples per report",
            identity.device,
            config.sampling_interval_ms,
            window.capacity()
        );

        Ok(Self {
            sampler: Co2Sampler::new(io.pulses, config.co2_range_ppm),
            climate: io.climate,
            window,
            link: ConnectionManager::new(io.transport, config.broker, io.indicator),
            device: Some(io.device),
            last_sample: None,
            run_state: AppRunState::Booting,
            announced: false,
            config,
            identity,
        })
    }

    /// Boot sequence: subscribe, attach the command dispatcher, open the first
    /// session and announce the node on the system topic.
    pub async fn start(&mut self, now: Instant) -> bool {
        self.set_run_state(AppRunState::BrokerConnecting);

        let topics: &'a TopicSet = self.identity.topics;
        self.link.subscribe(topics.control());
        if let Some(device) = self.device.take() {
            self.link
                .attach_handler(CommandDispatcher::new(topics.control(), device));
        }

        let connected = self.link.begin(self.identity.device.as_str(), now).await;
        if connected {
            self.announce().await;
        } else {
            warn!("Broker not reachable yet, continuing offline");
        }

        let _ = self.link.indicator().set_high();
        self.set_run_state(AppRunState::Running);
        connected
    }

    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.sample_due(now) {
            return self.sample(now).await;
        }

        let state = self.link.handle(now).await;
        if state == ConnectionState::Connected && !self.announced {
            self.announce().await;
        }
        TickOutcome::Serviced(state)
    }

    /// Publish `connected` for the first session of this boot.
    async fn announce(&mut self) {
        info!("Connected to broker");
        self.publish_status(SystemStatus::Connected).await;
        self.announced = true;
    }

    fn sample_due(&self, now: Instant) -> bool {
        if self.sampler.is_retrying() {
            return self.sampler.retry_due(now);
        }

        match self.last_sample {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.config.sampling_interval(),
        }
    }

    async fn sample(&mut self, now: Instant) -> TickOutcome {
        // The interval is measured from the start of a sampling slot
        if !self.sampler.is_retrying() {
            self.last_sample = Some(now);
        }

        match self.sampler.poll(now).await {
            SamplePoll::Retry => TickOutcome::SensorRetry,
            SamplePoll::Unavailable => {
                self.publish_status(SystemStatus::Co2SensorUnavailable)
                    .await;
                TickOutcome::SensorUnavailable
            }
            SamplePoll::Sample(ppm) => {
                if let Err(e) = self.window.register(ppm) {
                    warn!("Sample {} not registered: {}", ppm, e);
                }

                if !self.window.is_full() {
                    return TickOutcome::Sampled(ppm);
                }

                match self.transmit().await {
                    Ok(co2) => TickOutcome::Transmitted(co2),
                    Err(e) => {
                        error!("Report not sent: {}", e);
                        TickOutcome::TransmitFailed
                    }
                }
            }
        }
    }

    async fn transmit(&mut self) -> Result<u16, AppError> {
        let climate = self.climate.read().await;
        let co2 = self.window.reduce()?;

        let readings = match climate {
            Ok(readings) => readings,
            Err(e) => {
                self.publish_status(SystemStatus::ClimateSensorUnavailable)
                    .await;
                return Err(e.into());
            }
        };

        info!("Temperature (C): {:.2}", readings.temperature_celsius);
        info!("Humidity (%): {:.2}", readings.humidity_percent);
        info!("Computed CO2 (ppm): {}", co2);

        let report = MeasurementReport {
            owner: self.identity.owner,
            device: self.identity.device.as_str(),
            temperature: readings.temperature_celsius,
            humidity: readings.humidity_percent,
            co2,
        };
        let json = report.to_json()?;

        let topics: &'a TopicSet = self.identity.topics;
        let _ = self.link.indicator().set_low();
        self.link.publish(topics.telemetry(), json.as_bytes()).await;
        let _ = self.link.indicator().set_high();

        Ok(co2)
    }

    async fn publish_status(&mut self, status: SystemStatus) {
        let topics: &'a TopicSet = self.identity.topics;
        self.link
            .publish(topics.system(), status.as_str().as_bytes())
            .await;
    }

    pub fn set_run_state(&mut self, state: AppRunState) {
        if self.run_state != state {
            info!(
                "Run state: {} -> {}",
                self.run_state.as_str(),
                state.as_str()
            );
            self.run_state = state;
        }
    }

    pub fn run_state(&self) -> AppRunState {
        self.run_state
    }

    pub fn window(&self) -> &TrimmedMeanWindow {
        &self.window
    }

    pub fn link(&self) -> &ConnectionManager<'a, T, CommandDispatcher<'a, D>, L> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut ConnectionManager<'a, T, CommandDispatcher<'a, D>, L> {
        &mut self.link
    }

    /// Earliest instant at which the next tick has work to do besides
    /// servicing the connection.
    pub fn next_sample_at(&self) -> Option<Instant> {
        if let Some(at) = self.sampler.next_attempt() {
            return Some(at);
        }
        self.last_sample
            .map(|last| last + self.config.sampling_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        DeviceAction, FakeClimate, FakeDevice, FakePin, FakeTransport, ScriptedPulses,
    };
    use embassy_futures::block_on;
    use embassy_time::Duration;

    const MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
    const OWNER: &str = "a@b.com";
    // 5 * 122_000 - 10_000 = 600_000 -> 600 ppm
    const PULSE_600_PPM: u32 = 122_000;

    type TestNode<'a> = Node<'a, ScriptedPulses, FakeClimate, FakeTransport, FakeDevice, FakePin>;

    fn node<'a>(
        config: NodeConfig<'a>,
        device: &'a DeviceIdentity,
        topics: &'a TopicSet,
        pulses: ScriptedPulses,
        climate: FakeClimate,
        transport: FakeTransport,
    ) -> TestNode<'a> {
        Node::new(
            config,
            NodeIdentity {
                device,
                owner: OWNER,
                topics,
            },
            NodeIo {
                pulses,
                climate,
                transport,
                device: FakeDevice::default(),
                indicator: FakePin::default(),
            },
        )
        .unwrap()
    }

    fn identity() -> (DeviceIdentity, TopicSet) {
        let device = DeviceIdentity::from_mac(MAC);
        let topics = TopicSet::new("respira-indoor", OWNER, &device).unwrap();
        (device, topics)
    }

    fn short_config() -> NodeConfig<'static> {
        NodeConfig {
            sampling_interval_ms: 1_000,
            tx_interval_ms: 3_000,
            ..NodeConfig::default()
        }
    }

    #[test]
    fn start_announces_node_on_system_topic() {
        let (device, topics) = identity();
        let mut node = node(
            NodeConfig::default(),
            &device,
            &topics,
            ScriptedPulses::silent(),
            FakeClimate::steady(21.5, 40.25),
            FakeTransport::new(),
        );

        assert!(block_on(node.start(Instant::from_millis(0))));
        assert_eq!(node.run_state(), AppRunState::Running);

        let transport = node.link().transport();
        assert_eq!(transport.client_ids[0].as_str(), "AABBCCDDEEFF");
        assert_eq!(transport.subscriptions, [topics.control()]);
        assert_eq!(transport.published_on(topics.system()), ["connected"]);
    }

    #[test]
    fn first_session_after_failed_boot_handshake_is_announced() {
        let (device, topics) = identity();
        let mut node = node(
            NodeConfig::default(),
            &device,
            &topics,
            ScriptedPulses::steady(PULSE_600_PPM),
            FakeClimate::steady(21.5, 40.25),
            FakeTransport::failing(1),
        );

        assert!(!block_on(node.start(Instant::from_millis(0))));
        assert_eq!(
            block_on(node.tick(Instant::from_millis(0))),
            TickOutcome::Sampled(600)
        );
        assert_eq!(
            block_on(node.tick(Instant::from_millis(5_000))),
            TickOutcome::Serviced(ConnectionState::Connected)
        );
        assert_eq!(
            node.link().transport().published_on(topics.system()),
            ["connected"]
        );

        // Only once per boot, also after the session drops and comes back
        node.link_mut().transport_mut().drop_session();
        block_on(node.tick(Instant::from_millis(6_000)));
        block_on(node.tick(Instant::from_millis(7_000)));
        assert_eq!(node.link().transport().connects, 3);
        assert_eq!(
            node.link().transport().published_on(topics.system()),
            ["connected"]
        );
    }

    #[test]
    fn start_without_broker_stays_quiet() {
        let (device, topics) = identity();
        let mut node = node(
            NodeConfig::default(),
            &device,
            &topics,
            ScriptedPulses::silent(),
            FakeClimate::steady(21.5, 40.25),
            FakeTransport::failing(usize::MAX),
        );

        assert!(!block_on(node.start(Instant::from_millis(0))));
        assert!(node.link().transport().published.is_empty());
        assert_eq!(node.link().state(), ConnectionState::Connecting);
    }

    #[test]
    fn thirty_samples_produce_exactly_one_report() {
        let (device, topics) = identity();
        let mut node = node(
            NodeConfig::default(),
            &device,
            &topics,
            ScriptedPulses::steady(PULSE_600_PPM),
            FakeClimate::steady(21.5, 40.25),
            FakeTransport::new(),
        );
        let interval = Duration::from_millis(10_000);
        let mut now = Instant::from_millis(0);
        block_on(node.start(now));

        for i in 1..30 {
            assert_eq!(block_on(node.tick(now)), TickOutcome::Sampled(600));
            assert_eq!(node.window().len(), i);

            // Between samples only the connection is serviced
            let idle = block_on(node.tick(now + Duration::from_millis(5_000)));
            assert_eq!(idle, TickOutcome::Serviced(ConnectionState::Connected));
            now += interval;
        }
        assert_eq!(block_on(node.tick(now)), TickOutcome::Transmitted(600));
        assert_eq!(node.window().len(), 0);

        let reports = node.link().transport().published_on(topics.telemetry());
        assert_eq!(
            reports,
            [r#"{"owner":"a@b.com","device":"AABBCCDDEEFF","temperature":21.50,"humidity":40.25,"co2":600}"#]
        );
    }

    #[test]
    fn indicator_is_low_while_report_is_published() {
        let (device, topics) = identity();
        let mut node = node(
            short_config(),
            &device,
            &topics,
            ScriptedPulses::steady(PULSE_600_PPM),
            FakeClimate::steady(21.5, 40.25),
            FakeTransport::new(),
        );
        block_on(node.start(Instant::from_millis(0)));
        for s in 0..3 {
            block_on(node.tick(Instant::from_millis(s * 1_000)));
        }

        let levels = &node.link_mut().indicator().levels;
        assert_eq!(levels[levels.len() - 2..], [false, true]);
    }

    #[test]
    fn unavailable_sensor_publishes_status_and_leaves_window() {
        let (device, topics) = identity();
        let mut node = node(
            NodeConfig::default(),
            &device,
            &topics,
            ScriptedPulses::silent(),
            FakeClimate::steady(21.5, 40.25),
            FakeTransport::new(),
        );
        let mut now = Instant::from_millis(0);
        block_on(node.start(now));

        for _ in 0..9 {
            assert_eq!(block_on(node.tick(now)), TickOutcome::SensorRetry);
            // Retries wait for their slot; the connection is serviced meanwhile
            let idle = block_on(node.tick(now + Duration::from_millis(500)));
            assert!(matches!(idle, TickOutcome::Serviced(_)));
            now += Duration::from_millis(1_000);
        }
        assert_eq!(block_on(node.tick(now)), TickOutcome::SensorUnavailable);
        assert_eq!(node.window().len(), 0);
        assert_eq!(
            node.link().transport().published_on(topics.system()),
            ["connected", "No response from CO2 sensor"]
        );

        // Next slot is measured from the start of the abandoned one
        assert_eq!(
            node.next_sample_at(),
            Some(Instant::from_millis(10_000))
        );
    }

    #[test]
    fn climate_failure_skips_report_but_empties_window() {
        let (device, topics) = identity();
        let mut node = node(
            short_config(),
            &device,
            &topics,
            ScriptedPulses::steady(PULSE_600_PPM),
            FakeClimate::failing(),
            FakeTransport::new(),
        );
        block_on(node.start(Instant::from_millis(0)));

        block_on(node.tick(Instant::from_millis(0)));
        block_on(node.tick(Instant::from_millis(1_000)));
        assert_eq!(
            block_on(node.tick(Instant::from_millis(2_000))),
            TickOutcome::TransmitFailed
        );
        assert_eq!(node.window().len(), 0);

        let transport = node.link().transport();
        assert!(transport.published_on(topics.telemetry()).is_empty());
        assert_eq!(
            transport.published_on(topics.system()),
            ["connected", "No response from climate sensor"]
        );
    }

    #[test]
    fn control_command_reaches_device() {
        let (device, topics) = identity();
        let mut transport = FakeTransport::new();
        transport.push_inbound(topics.control(), b"factory-reset");
        let mut node = node(
            NodeConfig::default(),
            &device,
            &topics,
            ScriptedPulses::silent(),
            FakeClimate::steady(21.5, 40.25),
            transport,
        );

        block_on(node.start(Instant::from_millis(0)));
        let dispatcher = node.link().handler().unwrap();
        assert_eq!(
            dispatcher.device().actions,
            [DeviceAction::ClearProvisioning, DeviceAction::Restart]
        );
    }

    #[test]
    fn too_small_window_is_rejected() {
        let (device, topics) = identity();
        let config = NodeConfig {
            sampling_interval_ms: 1_000,
            tx_interval_ms: 2_000,
            ..NodeConfig::default()
        };
        let result = Node::new(
            config,
            NodeIdentity {
                device: &device,
                owner: OWNER,
                topics: &topics,
            },
            NodeIo {
                pulses: ScriptedPulses::silent(),
                climate: FakeClimate::failing(),
                transport: FakeTransport::new(),
                device: FakeDevice::default(),
                indicator: FakePin::default(),
            },
        );
        assert!(matches!(
            result,
            Err(ConfigError::WindowTooSmall { capacity: 2 })
        ));
    }
}
