//! LoRa point-to-point link firmware library.
//!
//! A transmitter node sends a short text packet every second; a receiver
//! node listens continuously and reports each packet with its RSSI and SNR.
//! Everything except the SX1262 driver and the OLED is platform-independent
//! and runs on the host against [`lora::sim::SimulatedRadio`].

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as lora_link_esp32;

#[cfg(feature = "esp32")]
pub mod display;
pub mod link;
pub mod lora;
pub mod report;
#[cfg(feature = "tap-tests")]
pub mod testing;

// Re-export commonly used items
pub use link::{boot, run, LinkRole, LinkSession, Role, SessionError, SessionOptions};
pub use lora::{Packet, PacketReady, RadioConfig, RadioError, RadioPeripheral};
pub use report::{DisplayReporter, LinkEvent, LogReporter, StatusDisplay, StatusReporter};

// Re-export testing items (only with tap-tests feature)
#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;
