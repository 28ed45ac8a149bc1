//! LoRa time-on-air calculation.
//!
//! Calculates the transmission duration for a LoRa packet based on payload
//! size and modulation parameters, using the formula from the Semtech SX1262
//! datasheet (Section 6.1.4). The transmitter reports this with every packet
//! and the simulated radio uses it to block like real hardware.
//!
//! # Example
//!
//! ```
//! use lora_link_esp32::lora::{time_on_air, RadioConfig};
//!
//! let airtime = time_on_air(16, &RadioConfig::default());
//! println!("16-byte packet takes {:?}", airtime);
//! ```

use super::config::RadioConfig;
use std::time::Duration;

/// Modulation parameters that affect airtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoRaParams {
    /// Spreading factor (7-12)
    pub spreading_factor: u8,
    /// Bandwidth in Hz
    pub bandwidth_hz: u32,
    /// Coding rate denominator (5-8 for 4/5 to 4/8)
    pub coding_rate: u8,
    /// Preamble length in symbols
    pub preamble_symbols: u16,
    /// Whether explicit header mode is used
    pub explicit_header: bool,
    /// Whether CRC is enabled
    pub crc_enabled: bool,
}

impl From<&RadioConfig> for LoRaParams {
    /// The link always runs explicit header mode with the payload CRC on.
    fn from(config: &RadioConfig) -> Self {
        Self {
            spreading_factor: config.spreading_factor,
            bandwidth_hz: config.bandwidth_hz(),
            coding_rate: config.coding_rate_denominator,
            preamble_symbols: config.preamble_symbols,
            explicit_header: true,
            crc_enabled: true,
        }
    }
}

impl LoRaParams {
    /// Check if low data rate optimization should be enabled.
    ///
    /// Required when symbol time exceeds 16ms (SF11/SF12 at 125kHz).
    pub fn low_data_rate_optimize(&self) -> bool {
        self.symbol_duration_us() > 16_000
    }

    /// Symbol duration in microseconds: 2^SF / BW.
    pub fn symbol_duration_us(&self) -> u64 {
        let sf = self.spreading_factor as u64;
        let bw = self.bandwidth_hz as u64;
        if bw == 0 {
            return 0;
        }
        (1u64 << sf) * 1_000_000 / bw
    }

    /// Packet airtime in microseconds for `payload_bytes` of payload.
    pub fn airtime_us(&self, payload_bytes: usize) -> u64 {
        let sf = self.spreading_factor as f64;
        let bw = self.bandwidth_hz as f64;

        if bw == 0.0 {
            return 0;
        }

        let t_sym_us = (1u64 << self.spreading_factor) as f64 * 1_000_000.0 / bw;

        // Preamble: (n_preamble + 4.25) symbols
        let t_preamble_us = (self.preamble_symbols as f64 + 4.25) * t_sym_us;

        let de = if self.low_data_rate_optimize() { 1.0 } else { 0.0 };
        let h = if self.explicit_header { 0.0 } else { 1.0 };
        let crc_bits = if self.crc_enabled { 16.0 } else { 0.0 };

        // 8 + max(ceil((8PL - 4SF + 28 + 16CRC - 20H) / 4(SF - 2DE)) * CR, 0)
        let pl = payload_bytes as f64;
        let numerator = 8.0 * pl - 4.0 * sf + 28.0 + crc_bits - 20.0 * h;
        let denominator = 4.0 * (sf - 2.0 * de);
        let cr = self.coding_rate as f64;
        let payload_symbols = if denominator > 0.0 {
            8.0 + (numerator / denominator).ceil().max(0.0) * cr
        } else {
            8.0
        };

        (t_preamble_us + payload_symbols * t_sym_us) as u64
    }
}

/// Time on air for a payload sent with `config`.
pub fn time_on_air(payload_bytes: usize, config: &RadioConfig) -> Duration {
    Duration::from_micros(LoRaParams::from(config).airtime_us(payload_bytes))
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use lora_link_esp32_macros::tap_test;

    #[tap_test]
    fn test_symbol_duration_sf7_125khz() {
        let params = LoRaParams::from(&RadioConfig::default());
        // 2^7 / 125000 = 1024 us
        assert_eq!(params.symbol_duration_us(), 1024);
    }

    #[tap_test]
    fn test_symbol_duration_sf12_125khz() {
        let config = RadioConfig {
            spreading_factor: 12,
            ..RadioConfig::default()
        };
        // 2^12 / 125000 = 32768 us
        assert_eq!(LoRaParams::from(&config).symbol_duration_us(), 32768);
    }

    #[tap_test]
    fn test_airtime_increases_with_payload() {
        let config = RadioConfig::default();
        let short = time_on_air(5, &config);
        let long = time_on_air(30, &config);
        assert!(long > short, "{:?} should exceed {:?}", long, short);
    }

    #[tap_test]
    fn test_airtime_increases_with_sf() {
        let sf7 = time_on_air(16, &RadioConfig::default());
        let sf12 = time_on_air(
            16,
            &RadioConfig {
                spreading_factor: 12,
                ..RadioConfig::default()
            },
        );
        assert!(sf12 > sf7 * 20);
    }

    #[tap_test]
    fn test_empty_packet_has_preamble_overhead() {
        let airtime = time_on_air(0, &RadioConfig::default());
        assert!(airtime > Duration::from_millis(10));
    }

    #[tap_test]
    fn test_zero_bandwidth_is_safe() {
        let params = LoRaParams {
            bandwidth_hz: 0,
            ..LoRaParams::from(&RadioConfig::default())
        };
        assert_eq!(params.symbol_duration_us(), 0);
        assert_eq!(params.airtime_us(16), 0);
    }
}
