//! Simulated radio for host builds.
//!
//! [`SimulatedRadio`] implements [`RadioPeripheral`] in memory. It behaves
//! like the SX1262 where the link logic cares:
//!
//! - a single receive buffer: a packet arriving while the previous one is
//!   still undrained, or while the radio is not armed, is lost
//! - draining or transmitting leaves receive mode; only `start_receive`
//!   re-arms
//! - the packet-ready flag is raised once per buffered packet, CRC failures
//!   included; a lost packet raises nothing
//!
//! Test code steers the radio through a [`SimHandle`]: inject packets,
//! script faults, and inspect the recorded call sequence. Radios attached
//! to the same [`SimulatedAir`] hear each other when their modulation
//! settings match.

use super::airtime::LoRaParams;
use super::config::{Setting, RADIO_BUFFER_BYTES};
use super::peripheral::{Packet, PacketReady, RadioError, RadioPeripheral};
use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A peripheral call, as recorded by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Initialize,
    Set(Setting),
    Transmit(usize),
    StartReceive,
    OnPacketReady,
    ReadReceived,
}

/// Fault a test can script into the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Driver status code.
    Code(i16),
    Timeout,
    CrcMismatch,
}

impl From<SimFault> for RadioError {
    fn from(fault: SimFault) -> Self {
        match fault {
            SimFault::Code(code) => RadioError::Fault(code),
            SimFault::Timeout => RadioError::Timeout,
            SimFault::CrcMismatch => RadioError::CrcMismatch,
        }
    }
}

/// Signal quality a listener on the [`SimulatedAir`] observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkQuality {
    pub rssi_dbm: i16,
    pub snr_db: i16,
}

impl Default for LinkQuality {
    fn default() -> Self {
        Self {
            rssi_dbm: -60,
            snr_db: 9,
        }
    }
}

/// Modulation settings as last applied to a simulated radio.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Modulation {
    frequency_mhz: Option<f32>,
    bandwidth_khz: Option<f32>,
    spreading_factor: Option<u8>,
    coding_rate: Option<u8>,
    preamble_symbols: Option<u16>,
}

impl Modulation {
    fn airtime(&self, payload_bytes: usize) -> Duration {
        let params = LoRaParams {
            spreading_factor: self.spreading_factor.unwrap_or(7),
            bandwidth_hz: (self.bandwidth_khz.unwrap_or(125.0) as f64 * 1000.0) as u32,
            coding_rate: self.coding_rate.unwrap_or(5),
            preamble_symbols: self.preamble_symbols.unwrap_or(8),
            explicit_header: true,
            crc_enabled: true,
        };
        Duration::from_micros(params.airtime_us(payload_bytes))
    }
}

#[derive(Debug)]
enum RxSlot {
    Packet(Packet),
    Corrupted,
}

#[derive(Debug, Default)]
struct SimState {
    initialized: bool,
    armed: bool,
    modulation: Modulation,
    output_power_dbm: Option<i8>,
    rx_slot: Option<RxSlot>,
    dropped: usize,
    ready: Option<PacketReady>,
    sent: Vec<Vec<u8>>,
    calls: Vec<Call>,
    last_rssi: Option<i16>,
    last_snr: Option<i16>,
    init_fault: Option<SimFault>,
    rejected_settings: Vec<Setting>,
    transmit_faults: VecDeque<SimFault>,
    arm_faults: VecDeque<SimFault>,
    read_faults: VecDeque<SimFault>,
}

impl SimState {
    fn check_setting(&mut self, setting: Setting) -> Result<(), RadioError> {
        self.calls.push(Call::Set(setting));
        if self.rejected_settings.contains(&setting) {
            return Err(RadioError::InvalidSetting {
                setting,
                reason: "rejected by simulator",
            });
        }
        Ok(())
    }

    fn accept(&mut self, slot: RxSlot) -> bool {
        if !self.armed || self.rx_slot.is_some() {
            self.dropped += 1;
            debug!("sim: packet dropped (armed={})", self.armed);
            return false;
        }
        self.rx_slot = Some(slot);
        if let Some(ready) = &self.ready {
            ready.signal();
        }
        true
    }
}

/// Test-side control of a [`SimulatedRadio`].
#[derive(Debug, Clone, Default)]
pub struct SimHandle(Arc<Mutex<SimState>>);

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `initialize` fail.
    pub fn fail_initialize(&self, fault: SimFault) {
        self.lock().init_fault = Some(fault);
    }

    /// Make every attempt to apply `setting` fail.
    pub fn reject_setting(&self, setting: Setting) {
        self.lock().rejected_settings.push(setting);
    }

    /// Fail the next `transmit`.
    pub fn fail_next_transmit(&self, fault: SimFault) {
        self.lock().transmit_faults.push_back(fault);
    }

    /// Fail the next `start_receive`.
    pub fn fail_next_start_receive(&self, fault: SimFault) {
        self.lock().arm_faults.push_back(fault);
    }

    /// Fail the next `read_received`, discarding any buffered packet.
    pub fn fail_next_read(&self, fault: SimFault) {
        self.lock().read_faults.push_back(fault);
    }

    /// A packet arrives over the air. Returns false if it was lost.
    pub fn deliver(&self, payload: &[u8], rssi_dbm: i16, snr_db: i16) -> bool {
        self.lock()
            .accept(RxSlot::Packet(Packet::received(payload, rssi_dbm, snr_db)))
    }

    /// A packet with a bad CRC arrives.
    pub fn deliver_corrupted(&self) -> bool {
        self.lock().accept(RxSlot::Corrupted)
    }

    /// Raise the ready flag with nothing buffered, as a glitch on DIO1 would.
    pub fn spurious_interrupt(&self) {
        if let Some(ready) = &self.lock().ready {
            ready.signal();
        }
    }

    /// Whether the radio is in continuous receive.
    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    /// Packets lost to an occupied buffer or an unarmed radio.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }

    /// Payloads handed to `transmit`, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Every peripheral call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: Call) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    /// Output power last applied, in dBm.
    pub fn output_power(&self) -> Option<i8> {
        self.lock().output_power_dbm
    }
}

/// Shared medium connecting simulated radios.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAir {
    listeners: Arc<Mutex<Vec<(SimHandle, LinkQuality)>>>,
}

impl SimulatedAir {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, handle: SimHandle, quality: LinkQuality) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle, quality));
    }

    fn broadcast(&self, from: &SimHandle, modulation: &Modulation, payload: &[u8]) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let mut heard = 0;
        for (handle, quality) in listeners.iter() {
            if Arc::ptr_eq(&handle.0, &from.0) {
                continue;
            }
            let mut state = handle.lock();
            if !same_channel(&state.modulation, modulation) {
                trace!("sim: listener on a different channel");
                continue;
            }
            let packet = Packet::received(payload, quality.rssi_dbm, quality.snr_db);
            if state.accept(RxSlot::Packet(packet)) {
                heard += 1;
            }
        }
        heard
    }
}

fn same_channel(a: &Modulation, b: &Modulation) -> bool {
    a.frequency_mhz == b.frequency_mhz
        && a.bandwidth_khz == b.bandwidth_khz
        && a.spreading_factor == b.spreading_factor
        && a.coding_rate == b.coding_rate
}

/// In-memory [`RadioPeripheral`].
#[derive(Debug, Default)]
pub struct SimulatedRadio {
    handle: SimHandle,
    air: Option<SimulatedAir>,
    realtime: bool,
}

impl SimulatedRadio {
    /// A standalone radio; packets arrive only through its [`SimHandle`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio attached to `air`, hearing other radios with `quality`.
    pub fn on_air(air: &SimulatedAir, quality: LinkQuality) -> Self {
        let radio = Self {
            air: Some(air.clone()),
            ..Self::default()
        };
        air.attach(radio.handle.clone(), quality);
        radio
    }

    /// Block in `transmit` for the packet's time on air.
    pub fn realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    /// Control handle for this radio.
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl RadioPeripheral for SimulatedRadio {
    fn initialize(&mut self) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.calls.push(Call::Initialize);
        if let Some(fault) = state.init_fault {
            return Err(fault.into());
        }
        state.initialized = true;
        state.armed = false;
        Ok(())
    }

    fn set_frequency(&mut self, mhz: f32) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.check_setting(Setting::Frequency)?;
        if !(150.0..=960.0).contains(&mhz) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::Frequency,
                reason: "outside 150-960 MHz",
            });
        }
        state.modulation.frequency_mhz = Some(mhz);
        Ok(())
    }

    fn set_bandwidth(&mut self, khz: f32) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.check_setting(Setting::Bandwidth)?;
        state.modulation.bandwidth_khz = Some(khz);
        Ok(())
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.check_setting(Setting::SpreadingFactor)?;
        if !(5..=12).contains(&sf) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::SpreadingFactor,
                reason: "outside SF5-SF12",
            });
        }
        state.modulation.spreading_factor = Some(sf);
        Ok(())
    }

    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.check_setting(Setting::CodingRate)?;
        if !(5..=8).contains(&denominator) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::CodingRate,
                reason: "outside 4/5-4/8",
            });
        }
        state.modulation.coding_rate = Some(denominator);
        Ok(())
    }

    fn set_output_power(&mut self, dbm: i8) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.check_setting(Setting::OutputPower)?;
        if !(-9..=22).contains(&dbm) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::OutputPower,
                reason: "outside -9..=22 dBm",
            });
        }
        state.output_power_dbm = Some(dbm);
        Ok(())
    }

    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.check_setting(Setting::PreambleLength)?;
        state.modulation.preamble_symbols = Some(symbols);
        Ok(())
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        let modulation = {
            let mut state = self.handle.lock();
            state.calls.push(Call::Transmit(payload.len()));
            if !state.initialized {
                return Err(RadioError::NotInitialized);
            }
            if payload.is_empty() {
                return Err(RadioError::EmptyPacket);
            }
            if payload.len() > RADIO_BUFFER_BYTES {
                return Err(RadioError::PacketTooLarge {
                    size: payload.len(),
                    max: RADIO_BUFFER_BYTES,
                });
            }
            // TX leaves receive mode, successful or not.
            state.armed = false;
            if let Some(fault) = state.transmit_faults.pop_front() {
                return Err(fault.into());
            }
            state.sent.push(payload.to_vec());
            state.modulation
        };

        if let Some(air) = &self.air {
            let heard = air.broadcast(&self.handle, &modulation, payload);
            debug!("sim: {} bytes heard by {} radio(s)", payload.len(), heard);
        }
        if self.realtime {
            std::thread::sleep(modulation.airtime(payload.len()));
        }
        Ok(())
    }

    fn start_receive(&mut self) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.calls.push(Call::StartReceive);
        if !state.initialized {
            return Err(RadioError::NotInitialized);
        }
        if let Some(fault) = state.arm_faults.pop_front() {
            return Err(fault.into());
        }
        state.armed = true;
        Ok(())
    }

    fn on_packet_ready(&mut self, ready: PacketReady) -> Result<(), RadioError> {
        let mut state = self.handle.lock();
        state.calls.push(Call::OnPacketReady);
        state.ready = Some(ready);
        Ok(())
    }

    fn read_received(&mut self) -> Result<Packet, RadioError> {
        let mut state = self.handle.lock();
        state.calls.push(Call::ReadReceived);
        if !state.initialized {
            return Err(RadioError::NotInitialized);
        }
        // Reading the buffer puts the radio in standby.
        state.armed = false;
        if let Some(fault) = state.read_faults.pop_front() {
            state.rx_slot = None;
            return Err(fault.into());
        }
        match state.rx_slot.take() {
            Some(RxSlot::Packet(packet)) => {
                state.last_rssi = packet.rssi_dbm;
                state.last_snr = packet.snr_db;
                Ok(packet)
            }
            Some(RxSlot::Corrupted) => Err(RadioError::CrcMismatch),
            None => Err(RadioError::NoPacket),
        }
    }

    fn last_rssi(&self) -> Option<i16> {
        self.handle.lock().last_rssi
    }

    fn last_snr(&self) -> Option<i16> {
        self.handle.lock().last_snr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::RadioConfig;

    fn ready_radio() -> (SimulatedRadio, SimHandle, PacketReady) {
        let mut radio = SimulatedRadio::new();
        let handle = radio.handle();
        let ready = PacketReady::new();
        radio.initialize().unwrap();
        radio.on_packet_ready(ready.clone()).unwrap();
        (radio, handle, ready)
    }

    #[test]
    fn test_unarmed_radio_drops_packets() {
        let (_radio, handle, ready) = ready_radio();
        assert!(!handle.deliver(b"lost", -50, 5));
        assert_eq!(handle.dropped(), 1);
        assert!(!ready.take());
    }

    #[test]
    fn test_second_packet_before_drain_is_lost() {
        let (mut radio, handle, ready) = ready_radio();
        radio.start_receive().unwrap();

        assert!(handle.deliver(b"first", -50, 5));
        assert!(!handle.deliver(b"second", -51, 4));
        assert_eq!(handle.dropped(), 1);

        assert!(ready.take());
        let packet = radio.read_received().unwrap();
        assert_eq!(packet.payload, b"first");
        assert!(!ready.take());
        assert!(matches!(radio.read_received(), Err(RadioError::NoPacket)));
    }

    #[test]
    fn test_packet_lost_after_take_does_not_raise_flag() {
        let (mut radio, handle, ready) = ready_radio();
        radio.start_receive().unwrap();

        assert!(handle.deliver(b"first", -50, 5));
        assert!(ready.take());
        // Arrives after the flag was taken but before the drain.
        assert!(!handle.deliver(b"second", -51, 4));
        assert_eq!(radio.read_received().unwrap().payload, b"first");
        assert!(!ready.take());
    }

    #[test]
    fn test_drain_leaves_receive_mode() {
        let (mut radio, handle, _ready) = ready_radio();
        radio.start_receive().unwrap();
        handle.deliver(b"x", -40, 10);
        radio.read_received().unwrap();
        assert!(!handle.is_armed());
        assert_eq!(radio.last_rssi(), Some(-40));
        assert_eq!(radio.last_snr(), Some(10));
    }

    #[test]
    fn test_corrupted_packet_reads_as_crc_mismatch() {
        let (mut radio, handle, ready) = ready_radio();
        radio.start_receive().unwrap();
        assert!(handle.deliver_corrupted());
        assert!(ready.take());
        assert!(radio.read_received().unwrap_err().is_crc_mismatch());
    }

    #[test]
    fn test_air_requires_matching_channel() {
        let air = SimulatedAir::new();
        let mut tx = SimulatedRadio::on_air(&air, LinkQuality::default());
        let mut rx = SimulatedRadio::on_air(&air, LinkQuality::default());
        let rx_handle = rx.handle();

        tx.initialize().unwrap();
        rx.initialize().unwrap();
        tx.configure(&RadioConfig::default()).unwrap();
        rx.configure(&RadioConfig {
            spreading_factor: 9,
            ..RadioConfig::default()
        })
        .unwrap();
        rx.start_receive().unwrap();

        tx.transmit(b"hello").unwrap();
        assert_eq!(rx_handle.dropped(), 0);
        assert!(matches!(rx.read_received(), Err(RadioError::NoPacket)));
    }

    #[test]
    fn test_transmit_before_initialize_fails() {
        let mut radio = SimulatedRadio::new();
        assert!(matches!(
            radio.transmit(b"x"),
            Err(RadioError::NotInitialized)
        ));
        assert!(radio.handle().sent().is_empty());
    }
}
