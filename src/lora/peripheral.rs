//! Radio peripheral contract.
//!
//! [`RadioPeripheral`] is the narrow surface the link loops drive: power-up,
//! per-setting configuration, blocking transmit, continuous receive and a
//! drain of the most recent packet. Two implementations exist: the SX1262
//! driver (ESP32 only) and the host simulator in [`super::sim`].
//!
//! # Packet-ready handoff
//!
//! The radio raises DIO1 once per fully received packet, including packets
//! whose CRC failed. The interrupt handler only sets a [`PacketReady`] flag;
//! the main loop polls it with [`PacketReady::take`], which clears the flag
//! before the drain starts. Nothing else crosses the interrupt boundary.

use super::config::{RadioConfig, Setting};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-bit, lock-free handoff from the radio interrupt to the main loop.
///
/// At most one event is outstanding: signalling twice before a `take`
/// still yields a single `true`.
#[derive(Debug, Clone, Default)]
pub struct PacketReady(Arc<AtomicBool>);

impl PacketReady {
    /// Create a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Safe to call from interrupt context.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consume the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Peek without consuming.
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A LoRa packet.
///
/// Quality metrics are properties of a reception; they are `None` when the
/// radio could not report them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// RSSI in dBm (received packets only).
    pub rssi_dbm: Option<i16>,
    /// SNR in dB (received packets only).
    pub snr_db: Option<i16>,
}

impl Packet {
    /// Packet drained from the radio.
    pub fn received(payload: impl Into<Vec<u8>>, rssi_dbm: i16, snr_db: i16) -> Self {
        Self {
            payload: payload.into(),
            rssi_dbm: Some(rssi_dbm),
            snr_db: Some(snr_db),
        }
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Abstraction over the physical transceiver.
///
/// All methods are called from the single main-loop context. The only thing
/// touched from interrupt context is the [`PacketReady`] flag registered via
/// [`on_packet_ready`](RadioPeripheral::on_packet_ready).
pub trait RadioPeripheral {
    /// Power up and reset the transceiver. Called once at process start.
    fn initialize(&mut self) -> Result<(), RadioError>;

    /// Set the carrier frequency in MHz.
    fn set_frequency(&mut self, mhz: f32) -> Result<(), RadioError>;

    /// Set the bandwidth in kHz.
    fn set_bandwidth(&mut self, khz: f32) -> Result<(), RadioError>;

    /// Set the spreading factor.
    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError>;

    /// Set the coding rate denominator (5 = 4/5).
    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError>;

    /// Set the output power in dBm.
    fn set_output_power(&mut self, dbm: i8) -> Result<(), RadioError>;

    /// Set the preamble length in symbols.
    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError>;

    /// Send one packet, blocking until the radio reports TX done.
    ///
    /// Exactly one attempt; no retry.
    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError>;

    /// Arm continuous receive. The radio does not re-arm by itself after a
    /// drain, so this must be called again after every `read_received`.
    fn start_receive(&mut self) -> Result<(), RadioError>;

    /// Register the flag raised once per fully received packet.
    fn on_packet_ready(&mut self, ready: PacketReady) -> Result<(), RadioError>;

    /// Drain the most recent packet with its RSSI and SNR.
    ///
    /// Only valid after a ready notification. A packet with a bad CRC
    /// yields [`RadioError::CrcMismatch`].
    fn read_received(&mut self) -> Result<Packet, RadioError>;

    /// RSSI of the last successfully drained packet.
    fn last_rssi(&self) -> Option<i16>;

    /// SNR of the last successfully drained packet.
    fn last_snr(&self) -> Option<i16>;

    /// Apply every setting in `config`.
    ///
    /// Best-effort: a rejected setting is recorded and the remaining
    /// settings are still applied.
    fn configure(&mut self, config: &RadioConfig) -> Result<(), ConfigErrors> {
        let mut errors = ConfigErrors::default();
        for setting in Setting::ALL {
            let result = match setting {
                Setting::Frequency => self.set_frequency(config.frequency_mhz),
                Setting::Bandwidth => self.set_bandwidth(config.bandwidth_khz),
                Setting::SpreadingFactor => self.set_spreading_factor(config.spreading_factor),
                Setting::CodingRate => self.set_coding_rate(config.coding_rate_denominator),
                Setting::OutputPower => self.set_output_power(config.output_power_dbm),
                Setting::PreambleLength => self.set_preamble_length(config.preamble_symbols),
            };
            if let Err(e) = result {
                errors.push(setting, e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Settings rejected during a best-effort [`RadioPeripheral::configure`].
#[derive(Debug, Default)]
pub struct ConfigErrors {
    rejected: Vec<(Setting, RadioError)>,
}

impl ConfigErrors {
    fn push(&mut self, setting: Setting, error: RadioError) {
        self.rejected.push((setting, error));
    }

    /// Number of rejected settings.
    pub fn len(&self) -> usize {
        self.rejected.len()
    }

    /// Whether every setting was accepted.
    pub fn is_empty(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Rejected settings in the order they were applied.
    pub fn iter(&self) -> impl Iterator<Item = &(Setting, RadioError)> {
        self.rejected.iter()
    }

    /// Whether `setting` was rejected.
    pub fn contains(&self, setting: Setting) -> bool {
        self.rejected.iter().any(|(s, _)| *s == setting)
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} setting(s) rejected", self.rejected.len())?;
        for (setting, error) in &self.rejected {
            write!(f, "; {}: {}", setting, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Radio errors.
#[derive(Debug)]
pub enum RadioError {
    /// Radio used before `initialize` succeeded.
    NotInitialized,
    /// Radio busy or TX done timeout.
    Timeout,
    /// Received packet failed its CRC check. Expected on a noisy channel.
    CrcMismatch,
    /// Payload exceeds the configured bound.
    PacketTooLarge { size: usize, max: usize },
    /// Empty payload.
    EmptyPacket,
    /// Drain requested with no packet buffered.
    NoPacket,
    /// Value rejected by the radio for this setting.
    InvalidSetting {
        setting: Setting,
        reason: &'static str,
    },
    /// Raw status code reported by the driver.
    Fault(i16),
    /// SPI communication error.
    #[cfg(feature = "esp32")]
    Spi(esp_idf_sys::EspError),
    /// GPIO error.
    #[cfg(feature = "esp32")]
    Gpio(esp_idf_sys::EspError),
    /// Command execution error.
    #[cfg(feature = "esp32")]
    Command(sx1262::Error),
}

impl RadioError {
    /// Whether this is the expected CRC condition rather than a fault.
    pub fn is_crc_mismatch(&self) -> bool {
        matches!(self, Self::CrcMismatch)
    }

    /// Numeric status code, as shown on the display.
    pub fn code(&self) -> i16 {
        match self {
            Self::Fault(code) => *code,
            Self::PacketTooLarge { .. } => -4,
            Self::Timeout => -5,
            Self::CrcMismatch => -7,
            Self::InvalidSetting { setting, .. } => match setting {
                Setting::Bandwidth => -8,
                Setting::SpreadingFactor => -9,
                Setting::CodingRate => -10,
                Setting::Frequency => -12,
                Setting::OutputPower => -13,
                Setting::PreambleLength => -18,
            },
            #[cfg(feature = "esp32")]
            Self::Spi(_) => -2,
            _ => -1,
        }
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "radio not initialized"),
            Self::Timeout => write!(f, "radio timeout"),
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::PacketTooLarge { size, max } => {
                write!(f, "packet too large: {} bytes (max {})", size, max)
            }
            Self::EmptyPacket => write!(f, "empty packet"),
            Self::NoPacket => write!(f, "no packet buffered"),
            Self::InvalidSetting { setting, reason } => {
                write!(f, "invalid {}: {}", setting, reason)
            }
            Self::Fault(code) => write!(f, "code {}", code),
            #[cfg(feature = "esp32")]
            Self::Spi(e) => write!(f, "SPI error: {:?}", e),
            #[cfg(feature = "esp32")]
            Self::Gpio(e) => write!(f, "GPIO error: {:?}", e),
            #[cfg(feature = "esp32")]
            Self::Command(e) => write!(f, "command error: {:?}", e),
        }
    }
}

impl std::error::Error for RadioError {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records setter calls; fails the ones listed in `failing`.
    #[derive(Default)]
    struct SetterRecorder {
        failing: Vec<Setting>,
        applied: Vec<Setting>,
    }

    impl SetterRecorder {
        fn apply(&mut self, setting: Setting) -> Result<(), RadioError> {
            self.applied.push(setting);
            if self.failing.contains(&setting) {
                Err(RadioError::InvalidSetting {
                    setting,
                    reason: "rejected by recorder",
                })
            } else {
                Ok(())
            }
        }
    }

    impl RadioPeripheral for SetterRecorder {
        fn initialize(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_frequency(&mut self, _mhz: f32) -> Result<(), RadioError> {
            self.apply(Setting::Frequency)
        }
        fn set_bandwidth(&mut self, _khz: f32) -> Result<(), RadioError> {
            self.apply(Setting::Bandwidth)
        }
        fn set_spreading_factor(&mut self, _sf: u8) -> Result<(), RadioError> {
            self.apply(Setting::SpreadingFactor)
        }
        fn set_coding_rate(&mut self, _denominator: u8) -> Result<(), RadioError> {
            self.apply(Setting::CodingRate)
        }
        fn set_output_power(&mut self, _dbm: i8) -> Result<(), RadioError> {
            self.apply(Setting::OutputPower)
        }
        fn set_preamble_length(&mut self, _symbols: u16) -> Result<(), RadioError> {
            self.apply(Setting::PreambleLength)
        }
        fn transmit(&mut self, _payload: &[u8]) -> Result<(), RadioError> {
            Ok(())
        }
        fn start_receive(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn on_packet_ready(&mut self, _ready: PacketReady) -> Result<(), RadioError> {
            Ok(())
        }
        fn read_received(&mut self) -> Result<Packet, RadioError> {
            Err(RadioError::NoPacket)
        }
        fn last_rssi(&self) -> Option<i16> {
            None
        }
        fn last_snr(&self) -> Option<i16> {
            None
        }
    }

    #[test]
    fn test_configure_applies_all_settings() {
        let mut radio = SetterRecorder::default();
        assert!(radio.configure(&RadioConfig::default()).is_ok());
        assert_eq!(radio.applied, Setting::ALL.to_vec());
    }

    #[test]
    fn test_configure_continues_after_each_single_failure() {
        for failing in Setting::ALL {
            let mut radio = SetterRecorder {
                failing: vec![failing],
                ..Default::default()
            };
            let errors = radio
                .configure(&RadioConfig::default())
                .expect_err("one setting should be rejected");

            assert_eq!(radio.applied, Setting::ALL.to_vec(), "failing {}", failing);
            assert_eq!(errors.len(), 1);
            assert!(errors.contains(failing));
        }
    }

    #[test]
    fn test_configure_reports_every_rejection() {
        let mut radio = SetterRecorder {
            failing: vec![Setting::Bandwidth, Setting::OutputPower],
            ..Default::default()
        };
        let errors = radio.configure(&RadioConfig::default()).unwrap_err();
        let rejected: Vec<Setting> = errors.iter().map(|(s, _)| *s).collect();
        assert_eq!(rejected, vec![Setting::Bandwidth, Setting::OutputPower]);
        assert_eq!(radio.applied.len(), 6);
        assert!(errors.to_string().starts_with("2 setting(s) rejected"));
    }

    #[test]
    fn test_packet_ready_single_outstanding() {
        let ready = PacketReady::new();
        assert!(!ready.take());

        ready.signal();
        ready.signal();
        assert!(ready.is_pending());
        assert!(ready.take());
        assert!(!ready.take());
    }

    #[test]
    fn test_packet_ready_shared_between_clones() {
        let ready = PacketReady::new();
        let isr_side = ready.clone();
        let handle = std::thread::spawn(move || isr_side.signal());
        handle.join().unwrap();
        assert!(ready.take());
    }

    #[test]
    fn test_received_packet_carries_metrics() {
        let received = Packet::received(b"Hello".to_vec(), -42, 9);
        assert_eq!(received.rssi_dbm, Some(-42));
        assert_eq!(received.snr_db, Some(9));
        assert_eq!(received.text(), "Hello");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RadioError::Fault(-2).code(), -2);
        assert_eq!(RadioError::CrcMismatch.code(), -7);
        assert_eq!(RadioError::NotInitialized.code(), -1);
        assert_eq!(
            RadioError::InvalidSetting {
                setting: Setting::Frequency,
                reason: "out of band",
            }
            .code(),
            -12
        );
    }

    #[test]
    fn test_crc_mismatch_is_distinguished() {
        assert!(RadioError::CrcMismatch.is_crc_mismatch());
        assert!(!RadioError::Fault(-1).is_crc_mismatch());
        assert!(!RadioError::Timeout.is_crc_mismatch());
    }
}
