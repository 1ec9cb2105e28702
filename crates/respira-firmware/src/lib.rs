//! ESP32-S3 bindings for respira-core
//!
//! Hardware implementations of the core traits: the SHT40 climate sensor, the
//! MQTT transport over embassy-net, device control and the Wi-Fi bring-up.

#![no_std]

extern crate alloc;

pub mod climate;
pub mod device;
pub mod mqtt;
pub mod network;
pub mod provisioning;
