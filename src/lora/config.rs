//! LoRa link configuration.
//!
//! Both ends of the link must agree on every modulation parameter, so the
//! reference values live here as constants and [`RadioConfig::for_role`]
//! only varies the output power between roles.

use crate::link::Role;
use std::fmt;

// ==================== Reference Link Parameters ====================
// Fixed for the lifetime of a session; there is no runtime reconfiguration.

/// Carrier frequency in MHz (US 902-928 MHz band).
pub const FREQUENCY_MHZ: f32 = 915.0;

/// Bandwidth in kHz.
pub const BANDWIDTH_KHZ: f32 = 125.0;

/// Spreading factor (SF7 - fastest, shortest range).
pub const SPREADING_FACTOR: u8 = 7;

/// Coding rate denominator (5 = 4/5 coding rate).
pub const CODING_RATE: u8 = 5;

/// Preamble length in symbols.
pub const PREAMBLE_LENGTH: u16 = 8;

/// Largest payload either role will hand to the radio.
pub const MAX_PAYLOAD_BYTES: usize = 30;

/// TX power used by the transmitting node, in dBm.
pub const TX_POWER_TRANSMITTER: i8 = 5;

/// TX power programmed on the receiving node, in dBm.
///
/// The receiver never transmits, but the setting is still applied so both
/// builds run the same configuration sequence.
pub const TX_POWER_RECEIVER: i8 = 14;

/// SX1262 FIFO size; no LoRa payload can exceed it.
pub const RADIO_BUFFER_BYTES: usize = 255;

/// Immutable set of link parameters shared by transmitter and receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioConfig {
    /// Carrier frequency in MHz.
    pub frequency_mhz: f32,
    /// Bandwidth in kHz.
    pub bandwidth_khz: f32,
    /// Spreading factor (7-12).
    pub spreading_factor: u8,
    /// Coding rate denominator (5-8 for 4/5 to 4/8).
    pub coding_rate_denominator: u8,
    /// Preamble length in symbols.
    pub preamble_symbols: u16,
    /// Output power in dBm.
    pub output_power_dbm: i8,
    /// Upper bound on payload length.
    pub max_payload_bytes: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: FREQUENCY_MHZ,
            bandwidth_khz: BANDWIDTH_KHZ,
            spreading_factor: SPREADING_FACTOR,
            coding_rate_denominator: CODING_RATE,
            preamble_symbols: PREAMBLE_LENGTH,
            output_power_dbm: TX_POWER_TRANSMITTER,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }
}

impl RadioConfig {
    /// Reference configuration for the given role.
    pub fn for_role(role: Role) -> Self {
        let output_power_dbm = match role {
            Role::Transmitter => TX_POWER_TRANSMITTER,
            Role::Receiver => TX_POWER_RECEIVER,
        };
        Self {
            output_power_dbm,
            ..Self::default()
        }
    }

    /// Bandwidth in Hz.
    pub fn bandwidth_hz(&self) -> u32 {
        (self.bandwidth_khz as f64 * 1000.0).round() as u32
    }

    /// Validate that every field is inside the range the SX1262 supports.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(150.0..=960.0).contains(&self.frequency_mhz) {
            return Err(ConfigError::OutOfRange {
                setting: Setting::Frequency,
                reason: "frequency must be within 150-960 MHz",
            });
        }
        if self.bandwidth_khz <= 0.0 || self.bandwidth_khz > 500.0 {
            return Err(ConfigError::OutOfRange {
                setting: Setting::Bandwidth,
                reason: "bandwidth must be > 0 and <= 500 kHz",
            });
        }
        if !(7..=12).contains(&self.spreading_factor) {
            return Err(ConfigError::OutOfRange {
                setting: Setting::SpreadingFactor,
                reason: "spreading factor must be within 7-12",
            });
        }
        if !(5..=8).contains(&self.coding_rate_denominator) {
            return Err(ConfigError::OutOfRange {
                setting: Setting::CodingRate,
                reason: "coding rate denominator must be within 5-8",
            });
        }
        if self.preamble_symbols == 0 {
            return Err(ConfigError::OutOfRange {
                setting: Setting::PreambleLength,
                reason: "preamble must be at least 1 symbol",
            });
        }
        if !(-9..=22).contains(&self.output_power_dbm) {
            return Err(ConfigError::OutOfRange {
                setting: Setting::OutputPower,
                reason: "output power must be within -9..=22 dBm",
            });
        }
        if self.max_payload_bytes == 0 || self.max_payload_bytes > RADIO_BUFFER_BYTES {
            return Err(ConfigError::PayloadBound {
                max: self.max_payload_bytes,
            });
        }
        Ok(())
    }
}

impl fmt::Display for RadioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} MHz, SF{}, {} kHz, CR 4/{}, preamble {}, {} dBm",
            self.frequency_mhz,
            self.spreading_factor,
            self.bandwidth_khz,
            self.coding_rate_denominator,
            self.preamble_symbols,
            self.output_power_dbm
        )
    }
}

/// One independently applied radio setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Frequency,
    Bandwidth,
    SpreadingFactor,
    CodingRate,
    OutputPower,
    PreambleLength,
}

impl Setting {
    /// All settings, in the order they are applied.
    pub const ALL: [Setting; 6] = [
        Setting::Frequency,
        Setting::Bandwidth,
        Setting::SpreadingFactor,
        Setting::CodingRate,
        Setting::OutputPower,
        Setting::PreambleLength,
    ];

    /// Short name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Bandwidth => "bandwidth",
            Self::SpreadingFactor => "spreading factor",
            Self::CodingRate => "coding rate",
            Self::OutputPower => "output power",
            Self::PreambleLength => "preamble length",
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Invalid [`RadioConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A modulation or power setting is outside the supported range.
    OutOfRange {
        setting: Setting,
        reason: &'static str,
    },
    /// Payload bound is zero or larger than the radio buffer.
    PayloadBound { max: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { setting, reason } => write!(f, "invalid {}: {}", setting, reason),
            Self::PayloadBound { max } => write!(
                f,
                "invalid payload bound {} (must be 1..={})",
                max, RADIO_BUFFER_BYTES
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_config_is_valid() {
        assert!(RadioConfig::default().validate().is_ok());
        assert!(RadioConfig::for_role(Role::Transmitter).validate().is_ok());
        assert!(RadioConfig::for_role(Role::Receiver).validate().is_ok());
    }

    #[test]
    fn test_roles_share_modulation() {
        let tx = RadioConfig::for_role(Role::Transmitter);
        let rx = RadioConfig::for_role(Role::Receiver);
        assert_eq!(tx.frequency_mhz, rx.frequency_mhz);
        assert_eq!(tx.bandwidth_khz, rx.bandwidth_khz);
        assert_eq!(tx.spreading_factor, rx.spreading_factor);
        assert_eq!(tx.coding_rate_denominator, rx.coding_rate_denominator);
        assert_eq!(tx.preamble_symbols, rx.preamble_symbols);
        assert_eq!(tx.max_payload_bytes, rx.max_payload_bytes);
        assert_eq!(tx.output_power_dbm, 5);
        assert_eq!(rx.output_power_dbm, 14);
    }

    #[test]
    fn test_unit_conversions() {
        let config = RadioConfig::default();
        assert_eq!(config.bandwidth_hz(), 125_000);

        let narrow = RadioConfig {
            bandwidth_khz: 62.5,
            ..RadioConfig::default()
        };
        assert_eq!(narrow.bandwidth_hz(), 62_500);
    }

    #[test]
    fn test_every_spreading_factor_in_range_is_valid() {
        for sf in 7..=12 {
            let config = RadioConfig {
                spreading_factor: sf,
                ..RadioConfig::default()
            };
            assert!(config.validate().is_ok(), "SF{} rejected", sf);
        }
    }

    #[test]
    fn test_spreading_factor_out_of_range() {
        for sf in [6, 13] {
            let config = RadioConfig {
                spreading_factor: sf,
                ..RadioConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::OutOfRange {
                    setting: Setting::SpreadingFactor,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_coding_rate_out_of_range() {
        let config = RadioConfig {
            coding_rate_denominator: 9,
            ..RadioConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                setting: Setting::CodingRate,
                ..
            })
        ));
    }

    #[test]
    fn test_payload_bound_limits() {
        let zero = RadioConfig {
            max_payload_bytes: 0,
            ..RadioConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::PayloadBound { max: 0 }));

        let full = RadioConfig {
            max_payload_bytes: RADIO_BUFFER_BYTES,
            ..RadioConfig::default()
        };
        assert!(full.validate().is_ok());

        let too_big = RadioConfig {
            max_payload_bytes: RADIO_BUFFER_BYTES + 1,
            ..RadioConfig::default()
        };
        assert!(too_big.validate().is_err());
    }

    #[test]
    fn test_display_summary() {
        let summary = RadioConfig::default().to_string();
        assert_eq!(
            summary,
            "915.0 MHz, SF7, 125 kHz, CR 4/5, preamble 8, 5 dBm"
        );
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use lora_link_esp32_macros::tap_test;

    #[tap_test]
    fn reference_config_validates() {
        assert!(RadioConfig::default().validate().is_ok());
    }

    #[tap_test(should_panic = "spreading factor")]
    fn out_of_range_spreading_factor_is_rejected() {
        let config = RadioConfig {
            spreading_factor: 13,
            ..RadioConfig::default()
        };
        config.validate().unwrap();
    }

    #[tap_test]
    fn settings_apply_in_fixed_order() {
        assert_eq!(Setting::ALL[0], Setting::Frequency);
        assert_eq!(Setting::ALL[5], Setting::PreambleLength);
    }
}
