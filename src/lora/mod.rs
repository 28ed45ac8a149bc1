//! LoRa radio support.
//!
//! This module contains:
//! - [`config`]: Link parameters and their validation
//! - [`airtime`]: Time-on-air calculation for LoRa packets
//! - [`peripheral`]: The radio contract and the packet-ready flag
//! - [`sim`]: In-memory radio for host builds and tests
//! - `sx1262`: SX1262 driver for the Heltec WiFi LoRa 32 V3 (ESP32 only)

mod airtime;
mod config;
mod peripheral;
pub mod sim;

#[cfg(feature = "esp32")]
mod sx1262;

pub use airtime::{time_on_air, LoRaParams};
pub use config::{
    ConfigError, RadioConfig, Setting, BANDWIDTH_KHZ, CODING_RATE, FREQUENCY_MHZ,
    MAX_PAYLOAD_BYTES, PREAMBLE_LENGTH, RADIO_BUFFER_BYTES, SPREADING_FACTOR,
    TX_POWER_RECEIVER, TX_POWER_TRANSMITTER,
};
pub use peripheral::{ConfigErrors, Packet, PacketReady, RadioError, RadioPeripheral};

#[cfg(feature = "esp32")]
pub use sx1262::{Sx1262Pins, Sx1262Radio};
