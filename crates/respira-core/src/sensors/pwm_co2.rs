use embassy_time::{Duration, Instant, with_timeout};
use embedded_hal_async::digital::Wait;
use log::{error, info, warn};

use super::{PulseSource, SensorError};
use crate::config::{SENSOR_MAX_ATTEMPTS, SENSOR_RETRY_DELAY};

/// Upper bound for one pulse measurement: two full periods of the sensor's
/// 1004 ms PWM cycle, so a measurement started mid-pulse still completes.
pub const PULSE_TIMEOUT: Duration = Duration::from_millis(2100);

/// Convert a high-pulse width into a CO2 concentration.
///
/// `ppm = ((range / 1000) * width_us - 2 * range) / 1000`
///
/// The operation order is part of the sensor calibration and must not be
/// rearranged: `range / 1000` truncates before the multiplication. Negative
/// intermediates (pulses shorter than the 2 ms preamble) yield 0.
pub const fn decode_ppm(pulse_width_us: u32, range_ppm: u16) -> u16 {
    let range = range_ppm as i64;
    let ppm = ((range / 1000) * pulse_width_us as i64 - 2 * range) / 1000;

    if ppm <= 0 {
        0
    } else if ppm > u16::MAX as i64 {
        u16::MAX
    } else {
        ppm as u16
    }
}

/// Outcome of one sampling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePoll {
    /// A decoded sample in ppm.
    Sample(u16),
    /// No pulse yet; try again at [`Co2Sampler::next_attempt`].
    Retry,
    /// The attempt budget is spent. The sampling slot is abandoned.
    Unavailable,
}

/// Reads the CO2 sensor with a bounded retry budget.
///
/// Instead of sleeping between attempts the sampler records when the next
/// attempt is allowed; the scheduler calls [`Co2Sampler::poll`] again once
/// [`Co2Sampler::retry_due`] holds.
pub struct Co2Sampler<S> {
    source: S,
    range_ppm: u16,
    failed_attempts: u8,
    next_attempt: Option<Instant>,
}

impl<S: PulseSource> Co2Sampler<S> {
    pub fn new(source: S, range_ppm: u16) -> Self {
        Self {
            source,
            range_ppm,
            failed_attempts: 0,
            next_attempt: None,
        }
    }

    /// True while a sampling slot is waiting for its next attempt.
    pub fn is_retrying(&self) -> bool {
        self.next_attempt.is_some()
    }

    pub fn retry_due(&self, now: Instant) -> bool {
        matches!(self.next_attempt, Some(at) if now >= at)
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    pub fn failed_attempts(&self) -> u8 {
        self.failed_attempts
    }

    /// Make one measurement attempt.
    pub async fn poll(&mut self, now: Instant) -> SamplePoll {
        let width = self.source.high_pulse_micros().await;

        if width != 0 {
            self.failed_attempts = 0;
            self.next_attempt = None;

            let ppm = decode_ppm(width, self.range_ppm);
            info!("CO2 (ppm): {} (pulse {} us)", ppm, width);
            return SamplePoll::Sample(ppm);
        }

        self.failed_attempts += 1;
        if self.failed_attempts >= SENSOR_MAX_ATTEMPTS {
            let timeout = SensorError::Timeout {
                sensor: "CO2 PWM",
                attempts: self.failed_attempts,
            };
            error!("{}, abandoning sample", timeout);
            self.failed_attempts = 0;
            self.next_attempt = None;
            return SamplePoll::Unavailable;
        }

        warn!(
            "CO2 sensor: no pulse (attempt {}/{})",
            self.failed_attempts, SENSOR_MAX_ATTEMPTS
        );
        self.next_attempt = Some(now + SENSOR_RETRY_DELAY);
        SamplePoll::Retry
    }
}

/// Measures high pulses on a GPIO input that supports async edge waits.
pub struct PwmPulseReader<P> {
    pin: P,
    timeout: Duration,
}

impl<P: Wait> PwmPulseReader<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            timeout: PULSE_TIMEOUT,
        }
    }

    async fn measure(&mut self) -> Result<Duration, P::Error> {
        // Skip a pulse that is already in progress
        self.pin.wait_for_low().await?;
        self.pin.wait_for_rising_edge().await?;
        let start = Instant::now();
        self.pin.wait_for_falling_edge().await?;
        Ok(Instant::now() - start)
    }
}

impl<P: Wait> PulseSource for PwmPulseReader<P> {
    async fn high_pulse_micros(&mut self) -> u32 {
        match with_timeout(self.timeout, self.measure()).await {
            Ok(Ok(width)) => width.as_micros().min(u32::MAX as u64) as u32,
            Ok(Err(e)) => {
                error!("CO2 PWM input error: {:?}", e);
                0
            }
            Err(_) => 0,
        }
    }
}
