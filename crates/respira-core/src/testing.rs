//! Test doubles shared by the unit tests

extern crate std;

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::convert::Infallible;
use core::future::poll_fn;
use core::task::Poll;
use std::sync::{Mutex, MutexGuard};

use embassy_time::{Duration, MockDriver};
use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};
use embedded_hal_async::digital::Wait;

use crate::commands::DeviceControl;
use crate::config::BrokerConfig;
use crate::link::{InboundHandler, InboundMessage, Transport};
use crate::sensors::{ClimateReadings, ClimateSensor, PulseSource, SensorError};

/// Pulse source replaying a script, then a fixed fallback width.
pub struct ScriptedPulses {
    script: VecDeque<u32>,
    fallback: u32,
    reads: usize,
}

impl ScriptedPulses {
    pub fn new(script: &[u32]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            fallback: 0,
            reads: 0,
        }
    }

    /// Never sees a pulse.
    pub fn silent() -> Self {
        Self::new(&[])
    }

    /// Always sees a pulse of `width` microseconds.
    pub fn steady(width: u32) -> Self {
        Self {
            fallback: width,
            ..Self::new(&[])
        }
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl PulseSource for ScriptedPulses {
    async fn high_pulse_micros(&mut self) -> u32 {
        self.reads += 1;
        self.script.pop_front().unwrap_or(self.fallback)
    }
}

pub struct FakeClimate {
    readings: Option<ClimateReadings>,
}

impl FakeClimate {
    pub fn steady(temperature_celsius: f32, humidity_percent: f32) -> Self {
        Self {
            readings: Some(ClimateReadings {
                temperature_celsius,
                humidity_percent,
            }),
        }
    }

    pub fn failing() -> Self {
        Self { readings: None }
    }
}

impl ClimateSensor for FakeClimate {
    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        self.readings.ok_or(SensorError::ReadFailed {
            sensor: "fake",
            operation: "read",
            details: "scripted failure",
        })
    }
}

#[derive(Debug)]
pub struct FakeTransportError;

/// In-memory broker session recording everything the link does.
#[derive(Default)]
pub struct FakeTransport {
    connected: bool,
    failures_left: usize,
    inbound: VecDeque<InboundMessage>,
    pub connects: usize,
    pub client_ids: Vec<String>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `count` handshakes.
    pub fn failing(count: usize) -> Self {
        Self {
            failures_left: count,
            ..Self::default()
        }
    }

    pub fn drop_session(&mut self) {
        self.connected = false;
    }

    pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back(InboundMessage {
            topic: heapless::String::try_from(topic).unwrap(),
            payload: heapless::Vec::from_slice(payload).unwrap(),
        });
    }

    /// Payloads published on `topic`, as text.
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| String::from_utf8_lossy(p).to_string())
            .collect()
    }
}

impl Transport for FakeTransport {
    type Error = FakeTransportError;

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(
        &mut self,
        _broker: &BrokerConfig<'_>,
        client_id: &str,
    ) -> Result<(), Self::Error> {
        self.connects += 1;
        self.client_ids.push(client_id.to_string());
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(FakeTransportError);
        }
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, Self::Error> {
        if !self.connected {
            return Ok(None);
        }
        Ok(self.inbound.pop_front())
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    pub received: Vec<(String, String)>,
}

impl InboundHandler for RecordingHandler {
    fn on_message(&mut self, topic: &str, payload: &str) {
        self.received.push((topic.to_string(), payload.to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Restart,
    ClearProvisioning,
}

#[derive(Default)]
pub struct FakeDevice {
    pub actions: Vec<DeviceAction>,
}

impl DeviceControl for FakeDevice {
    fn restart(&mut self) {
        self.actions.push(DeviceAction::Restart);
    }

    fn clear_provisioning(&mut self) {
        self.actions.push(DeviceAction::ClearProvisioning);
    }
}

/// Output pin remembering every level it was driven to.
#[derive(Default)]
pub struct FakePin {
    pub levels: Vec<bool>,
}

impl FakePin {
    pub fn is_high(&self) -> bool {
        self.levels.last().copied().unwrap_or(false)
    }
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.push(true);
        Ok(())
    }
}

static MOCK_CLOCK: Mutex<()> = Mutex::new(());

/// Exclusive use of the mock time driver, reset to zero.
pub fn mock_clock() -> MutexGuard<'static, ()> {
    let guard = MOCK_CLOCK.lock().unwrap_or_else(|e| e.into_inner());
    MockDriver::get().reset();
    guard
}

/// How one edge wait of a [`ScriptedPin`] resolves.
#[derive(Debug, Clone, Copy)]
pub enum PinStep {
    /// The edge arrives after this much mock time.
    After(Duration),
    /// The edge never arrives; mock time keeps running.
    Never,
    /// The input reports an error.
    Fault,
}

/// Input pin resolving each wait from a script, on the mock clock.
pub struct ScriptedPin {
    steps: VecDeque<PinStep>,
    pub waits: Vec<&'static str>,
}

impl ScriptedPin {
    pub fn new(steps: &[PinStep]) -> Self {
        Self {
            steps: steps.iter().copied().collect(),
            waits: Vec::new(),
        }
    }

    async fn next(&mut self, wait: &'static str) -> Result<(), ErrorKind> {
        self.waits.push(wait);
        match self.steps.pop_front().unwrap_or(PinStep::Never) {
            PinStep::After(delay) => {
                MockDriver::get().advance(delay);
                Ok(())
            }
            PinStep::Fault => Err(ErrorKind::Other),
            PinStep::Never => {
                poll_fn(|cx| {
                    MockDriver::get().advance(Duration::from_millis(100));
                    cx.waker().wake_by_ref();
                    Poll::Pending
                })
                .await
            }
        }
    }
}

impl ErrorType for ScriptedPin {
    type Error = ErrorKind;
}

impl Wait for ScriptedPin {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        self.next("high").await
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        self.next("low").await
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        self.next("rising").await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        self.next("falling").await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.next("any").await
    }
}
