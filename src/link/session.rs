//! Link session: the one radio peripheral bound to one configuration.
//!
//! Lifecycle: `start` (validate, initialize, best-effort configure) hands
//! back a configured session that a role loop then drives for the rest of
//! the process. Only two faults are fatal: the radio failing to initialize
//! and the receiver failing to arm its first receive.

use super::Role;
use crate::lora::{
    time_on_air, ConfigError, Packet, PacketReady, RadioConfig, RadioError, RadioPeripheral,
};
use crate::report::{LinkEvent, StatusReporter};
use log::debug;
use std::fmt;
use std::time::Duration;

/// Delay between transmissions.
pub const TX_INTERVAL: Duration = Duration::from_millis(1000);

/// How often the receiver checks the packet-ready flag.
pub const RX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settle time after switching on the auxiliary power rail.
pub const AUX_POWER_SETTLE: Duration = Duration::from_millis(100);

/// Auxiliary board power (Vext on Heltec boards), needed by the display.
pub trait AuxPower {
    fn enable(&mut self) -> Result<(), RadioError>;
}

/// Board without a switchable rail.
#[derive(Debug, Default)]
pub struct NoAuxPower;

impl AuxPower for NoAuxPower {
    fn enable(&mut self) -> Result<(), RadioError> {
        Ok(())
    }
}

/// Startup-time switches that differ between the two node builds.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Switch on the auxiliary rail before the display is used.
    pub enable_aux_power: bool,
    /// First line of the startup screen.
    pub banner: String,
    /// How long the ready screen stays up before the loop starts.
    pub ready_hold: Duration,
    /// Transmitter cadence.
    pub tx_interval: Duration,
    /// Receiver poll cadence.
    pub rx_poll_interval: Duration,
}

impl SessionOptions {
    /// Options used by the firmware for `role`.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Transmitter => Self {
                enable_aux_power: true,
                banner: "LoRa TX".to_string(),
                ready_hold: Duration::ZERO,
                tx_interval: TX_INTERVAL,
                rx_poll_interval: RX_POLL_INTERVAL,
            },
            Role::Receiver => Self {
                enable_aux_power: true,
                banner: "LoRa RX".to_string(),
                ready_hold: Duration::from_millis(500),
                tx_interval: TX_INTERVAL,
                rx_poll_interval: RX_POLL_INTERVAL,
            },
        }
    }

    /// Switch on the auxiliary rail if this build uses it.
    pub fn power_up(&self, power: &mut dyn AuxPower) -> Result<(), RadioError> {
        if !self.enable_aux_power {
            return Ok(());
        }
        power.enable()?;
        std::thread::sleep(AUX_POWER_SETTLE);
        Ok(())
    }
}

/// The running radio bound to its configuration.
pub struct LinkSession<P> {
    radio: P,
    config: RadioConfig,
    ready: PacketReady,
    ready_attached: bool,
    armed: bool,
}

impl<P: RadioPeripheral> LinkSession<P> {
    /// Validate `config`, initialize the radio and apply every setting.
    ///
    /// Rejected settings are reported and skipped. Only an invalid
    /// configuration or a failed initialization aborts startup.
    pub fn start(
        mut radio: P,
        config: RadioConfig,
        reporter: &mut dyn StatusReporter,
    ) -> Result<Self, SessionError> {
        config.validate().map_err(SessionError::InvalidConfig)?;

        radio.initialize().map_err(SessionError::Init)?;
        debug!("radio initialized, applying {}", config);

        if let Err(errors) = radio.configure(&config) {
            for (setting, error) in errors.iter() {
                reporter.report(&LinkEvent::SettingRejected {
                    setting: *setting,
                    error: error.to_string(),
                });
            }
        }

        Ok(Self {
            radio,
            config,
            ready: PacketReady::new(),
            ready_attached: false,
            armed: false,
        })
    }

    /// Configuration this session runs with.
    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// The underlying peripheral.
    pub fn radio(&self) -> &P {
        &self.radio
    }

    /// Whether continuous receive was armed and nothing has disarmed it since.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Send `payload`, returning its time on air.
    ///
    /// Payloads over the configured bound are rejected without touching the
    /// radio.
    pub fn transmit(&mut self, payload: &[u8]) -> Result<Duration, RadioError> {
        let max = self.config.max_payload_bytes;
        if payload.len() > max {
            return Err(RadioError::PacketTooLarge {
                size: payload.len(),
                max,
            });
        }
        self.armed = false;
        self.radio.transmit(payload)?;
        Ok(time_on_air(payload.len(), &self.config))
    }

    /// Arm continuous receive, registering the ready flag on first use.
    pub fn arm(&mut self) -> Result<(), RadioError> {
        if !self.ready_attached {
            self.radio.on_packet_ready(self.ready.clone())?;
            self.ready_attached = true;
        }
        self.radio.start_receive()?;
        self.armed = true;
        Ok(())
    }

    /// Consume a pending ready notification. Never blocks.
    pub fn take_ready(&self) -> bool {
        self.ready.take()
    }

    /// Drain the buffered packet. The radio is left disarmed.
    pub fn drain(&mut self) -> Result<Packet, RadioError> {
        self.armed = false;
        let mut packet = self.radio.read_received()?;
        if packet.rssi_dbm.is_none() {
            packet.rssi_dbm = self.radio.last_rssi();
        }
        if packet.snr_db.is_none() {
            packet.snr_db = self.radio.last_snr();
        }
        Ok(packet)
    }
}

/// Faults that stop the node before either loop runs.
#[derive(Debug)]
pub enum SessionError {
    /// Compile-time configuration out of range.
    InvalidConfig(ConfigError),
    /// Radio failed to initialize.
    Init(RadioError),
    /// Receiver failed to arm its first receive.
    Arm(RadioError),
}

impl SessionError {
    /// Numeric code shown on the failure screen.
    pub fn code(&self) -> i16 {
        match self {
            Self::InvalidConfig(_) => -1,
            Self::Init(e) | Self::Arm(e) => e.code(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "invalid radio config: {}", e),
            Self::Init(e) => write!(f, "radio init failed: {}", e),
            Self::Arm(e) => write!(f, "starting receive failed: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(e) => Some(e),
            Self::Init(e) | Self::Arm(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::sim::{Call, SimFault, SimulatedRadio};
    use crate::lora::Setting;

    fn started(radio: SimulatedRadio) -> LinkSession<SimulatedRadio> {
        let mut events: Vec<LinkEvent> = Vec::new();
        LinkSession::start(radio, RadioConfig::default(), &mut events).unwrap()
    }

    #[test]
    fn test_start_initializes_then_configures() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        let _session = started(radio);

        let calls = handle.calls();
        assert_eq!(calls[0], Call::Initialize);
        let settings: Vec<Call> = Setting::ALL.iter().map(|s| Call::Set(*s)).collect();
        assert_eq!(&calls[1..], settings.as_slice());
        assert_eq!(handle.output_power(), Some(5));
    }

    #[test]
    fn test_rejected_setting_is_reported_and_others_applied() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        handle.reject_setting(Setting::SpreadingFactor);

        let mut events: Vec<LinkEvent> = Vec::new();
        let session = LinkSession::start(radio, RadioConfig::default(), &mut events);
        assert!(session.is_ok());

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LinkEvent::SettingRejected {
                setting: Setting::SpreadingFactor,
                ..
            }
        ));
        for setting in Setting::ALL {
            assert_eq!(handle.count(Call::Set(setting)), 1);
        }
    }

    #[test]
    fn test_init_fault_is_fatal() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        handle.fail_initialize(SimFault::Code(-2));

        let mut events: Vec<LinkEvent> = Vec::new();
        let err = LinkSession::start(radio, RadioConfig::default(), &mut events)
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Init(RadioError::Fault(-2))));
        assert_eq!(err.code(), -2);
        assert_eq!(handle.calls(), vec![Call::Initialize]);
    }

    #[test]
    fn test_invalid_config_never_touches_radio() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        let config = RadioConfig {
            spreading_factor: 13,
            ..RadioConfig::default()
        };
        let mut events: Vec<LinkEvent> = Vec::new();
        let result = LinkSession::start(radio, config, &mut events);
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn test_payload_at_bound_is_accepted() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        let mut session = started(radio);

        let payload = vec![b'a'; session.config().max_payload_bytes];
        assert!(session.transmit(&payload).is_ok());
        assert_eq!(handle.sent(), vec![payload]);
    }

    #[test]
    fn test_payload_over_bound_rejected_before_radio() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        let mut session = started(radio);

        let max = session.config().max_payload_bytes;
        let payload = vec![b'a'; max + 1];
        let err = session.transmit(&payload).unwrap_err();
        assert!(matches!(
            err,
            RadioError::PacketTooLarge { size, max: m } if size == max + 1 && m == max
        ));
        assert_eq!(handle.count(Call::Transmit(max + 1)), 0);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn test_arm_registers_ready_once() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        let mut session = started(radio);

        session.arm().unwrap();
        session.arm().unwrap();
        assert_eq!(handle.count(Call::OnPacketReady), 1);
        assert_eq!(handle.count(Call::StartReceive), 2);
        assert!(session.is_armed());
        assert!(handle.is_armed());
    }

    #[test]
    fn test_drain_disarms() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        let mut session = started(radio);
        session.arm().unwrap();

        handle.deliver(b"ping", -70, 3);
        assert!(session.take_ready());
        let packet = session.drain().unwrap();
        assert_eq!(packet.text(), "ping");
        assert!(!session.is_armed());
        assert!(!handle.is_armed());
    }

    #[test]
    fn test_aux_power_only_when_enabled() {
        struct Counting(usize);
        impl AuxPower for Counting {
            fn enable(&mut self) -> Result<(), RadioError> {
                self.0 += 1;
                Ok(())
            }
        }

        let mut rail = Counting(0);
        let mut options = SessionOptions::for_role(Role::Transmitter);
        options.enable_aux_power = false;
        options.power_up(&mut rail).unwrap();
        assert_eq!(rail.0, 0);

        options.enable_aux_power = true;
        options.power_up(&mut rail).unwrap();
        assert_eq!(rail.0, 1);
    }
}
