//! Hardware-independent core library for respira-indoor
//!
//! This crate contains all platform-agnostic logic for the respira-indoor CO2
//! node: PWM duty-cycle decoding, the trimmed-mean aggregation window, the MQTT
//! connection state machine, control command dispatch, telemetry formatting and
//! the cooperative scheduler that ties them together.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod aggregator;
pub mod app_state;
pub mod commands;
pub mod config;
pub mod identity;
pub mod link;
pub mod node;
pub mod sensors;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
