//! Trimmed-mean aggregation window
//!
//! The node samples CO2 every sampling interval and transmits one value per
//! transmission interval. The window collects the samples in between and
//! reduces them to the mean after dropping one minimum and one maximum, so a
//! single spike in either direction does not reach the report.

use alloc::vec::Vec;

use thiserror_no_std::Error;

use crate::config::{ConfigError, MIN_WINDOW_CAPACITY, NodeConfig};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationError {
    #[error("aggregation window is full ({capacity} samples)")]
    WindowFull { capacity: usize },
    #[error("aggregation window holds {len} of {capacity} samples")]
    NotFull { len: usize, capacity: usize },
}

/// Fixed-capacity window of CO2 samples in ppm.
#[derive(Debug, Clone)]
pub struct TrimmedMeanWindow {
    samples: Vec<u16>,
    capacity: usize,
}

impl TrimmedMeanWindow {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity < MIN_WINDOW_CAPACITY {
            return Err(ConfigError::WindowTooSmall { capacity });
        }

        Ok(Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        })
    }

    /// Window sized for one transmission interval of `config`.
    pub fn from_config(config: &NodeConfig<'_>) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(config.window_capacity())
    }

    pub fn register(&mut self, sample: u16) -> Result<(), AggregationError> {
        if self.is_full() {
            return Err(AggregationError::WindowFull {
                capacity: self.capacity,
            });
        }

        self.samples.push(sample);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reduce a full window to its trimmed mean and empty it.
    ///
    /// Exactly one minimum and one maximum are excluded, both picked by first
    /// occurrence. The maximum is searched among the remaining indices, so a
    /// window of equal samples reduces to that value.
    pub fn reduce(&mut self) -> Result<u16, AggregationError> {
        if !self.is_full() {
            return Err(AggregationError::NotFull {
                len: self.samples.len(),
                capacity: self.capacity,
            });
        }

        let mean = Self::trimmed_mean(&self.samples);
        self.samples.clear();
        Ok(mean)
    }

    fn trimmed_mean(samples: &[u16]) -> u16 {
        let mut min_index = 0;
        for (i, &value) in samples.iter().enumerate() {
            if value < samples[min_index] {
                min_index = i;
            }
        }

        let mut max_index = None;
        for (i, &value) in samples.iter().enumerate() {
            if i == min_index {
                continue;
            }
            match max_index {
                Some(m) if value <= samples[m] => {}
                _ => max_index = Some(i),
            }
        }

        let mut sum: u32 = 0;
        for (i, &value) in samples.iter().enumerate() {
            if i != min_index && Some(i) != max_index {
                sum += value as u32;
            }
        }

        // Capacity >= 3 leaves at least one sample
        let count = (samples.len() - 2) as u32;
        (sum / count) as u16
    }
}
