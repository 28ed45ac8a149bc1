//! SX1262 radio driver for ESP32.
//!
//! This module drives the SX1262 on the Heltec WiFi LoRa 32 V3 through the
//! `sx1262` crate's command set.
//!
//! # Pin Configuration (Heltec WiFi LoRa 32 V3)
//!
//! | Signal | GPIO | Notes |
//! |--------|------|-------|
//! | SPI CLK | 9 | SPI Clock |
//! | SPI MOSI | 10 | Master Out Slave In |
//! | SPI MISO | 11 | Master In Slave Out |
//! | NSS (CS) | 8 | Chip Select |
//! | RESET | 12 | Radio Reset |
//! | BUSY | 13 | Radio Busy Status |
//! | DIO1 | 14 | RX done interrupt |
//!
//! Transmit blocks, polling the IRQ status for TX done. Receive is
//! continuous; DIO1 rises on RX done and the interrupt handler only raises
//! the registered [`PacketReady`] flag.

use super::airtime::LoRaParams;
use super::config::{Setting, RADIO_BUFFER_BYTES};
use super::peripheral::{Packet, PacketReady, RadioError, RadioPeripheral};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{
    Gpio10, Gpio11, Gpio12, Gpio13, Gpio14, Gpio8, Gpio9, Input, InterruptType, Output, PinDriver,
    Pull,
};
use esp_idf_hal::spi::config::Config as SpiConfig;
use esp_idf_hal::spi::config::DriverConfig;
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver, SPI2};
use esp_idf_hal::units::FromValueType;
use log::{debug, info, warn};
use regiface::{Command, NoParameters, ToByteArray};
use std::time::Duration;
use sx1262::{
    ClearIrqStatus, Device, DeviceSelect, DioIrqConfig, GetIrqStatus, GetPacketStatus,
    GetRxBufferStatus, IrqMask, PaConfig, PacketParams, PacketType, RampTime, RfFrequencyConfig,
    RxMode, SetDioIrqParams, SetPaConfig, SetPacketParams, SetPacketType, SetRfFrequency, SetRx,
    SetStandby, SetTx, SetTxParams, StandbyConfig, Timeout, TxParams,
};

/// Maximum time to wait for radio to become ready (ms).
const BUSY_TIMEOUT_MS: u32 = 1000;

/// Maximum time to wait for TX completion (seconds).
const TX_TIMEOUT_SECS: u64 = 5;

/// CrcErr bit of the IRQ status register (datasheet Table 13-29).
const IRQ_CRC_ERR: u16 = 1 << 6;

fn crc_err() -> IrqMask {
    IrqMask::from_bits_truncate(IRQ_CRC_ERR)
}

/// Raw LoRa modulation parameters.
///
/// Format: [SF, BW, CR, LowDataRateOpt, 0, 0, 0, 0]
#[derive(Debug, Clone)]
struct RawLoRaModParams([u8; 8]);

impl RawLoRaModParams {
    fn new(sf: u8, bw: u8, cr: u8, low_data_rate_opt: bool) -> Self {
        Self([sf, bw, cr, low_data_rate_opt as u8, 0, 0, 0, 0])
    }
}

impl ToByteArray for RawLoRaModParams {
    type Error = core::convert::Infallible;
    type Array = [u8; 8];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok(self.0)
    }
}

/// Raw SetModulationParams command (opcode 0x8B).
///
/// The `sx1262` crate's bandwidth enum carries the wrong register values.
#[derive(Debug, Clone)]
struct RawSetModulationParams {
    params: RawLoRaModParams,
}

impl Command for RawSetModulationParams {
    type IdType = u8;
    type CommandParameters = RawLoRaModParams;
    type ResponseParameters = NoParameters;

    fn id() -> Self::IdType {
        0x8B
    }

    fn invoking_parameters(self) -> Self::CommandParameters {
        self.params
    }
}

/// Wait for BUSY to drop, then run one command.
macro_rules! exec {
    ($radio:expr, $command:expr) => {{
        $radio.wait_busy()?;
        $radio
            .device
            .execute_command($command)
            .map_err(RadioError::Command)
    }};
}

/// Register value for a LoRa bandwidth in kHz (datasheet Table 13-48).
fn bandwidth_code(khz: f32) -> Option<u8> {
    const TABLE: [(f32, u8); 10] = [
        (7.8, 0x00),
        (10.4, 0x08),
        (15.6, 0x01),
        (20.8, 0x09),
        (31.25, 0x02),
        (41.7, 0x0A),
        (62.5, 0x03),
        (125.0, 0x04),
        (250.0, 0x05),
        (500.0, 0x06),
    ];
    TABLE
        .iter()
        .find(|(bw, _)| (bw - khz).abs() < 0.05)
        .map(|(_, code)| *code)
}

/// Build LoRa packet parameters as raw bytes.
///
/// Format: [preamble_hi, preamble_lo, header_type, payload_len, crc_on, invert_iq, 0, 0, 0]
fn build_lora_packet_params(preamble: u16, payload_len: u8) -> PacketParams {
    PacketParams {
        params: [
            (preamble >> 8) as u8,
            (preamble & 0xFF) as u8,
            0x00, // explicit header
            payload_len,
            0x01, // CRC on
            0x00, // standard IQ
            0,
            0,
            0,
        ],
    }
}

/// GPIOs wired to the SX1262 on the Heltec V3.
pub struct Sx1262Pins {
    pub spi: SPI2,
    pub sclk: Gpio9,
    pub mosi: Gpio10,
    pub miso: Gpio11,
    pub cs: Gpio8,
    pub reset: Gpio12,
    pub busy: Gpio13,
    pub dio1: Gpio14,
}

/// Modulation state mirrored from the last accepted setters.
#[derive(Debug, Clone, Copy)]
struct Modulation {
    spreading_factor: u8,
    bandwidth_khz: f32,
    coding_rate: u8,
    preamble_symbols: u16,
}

impl Default for Modulation {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth_khz: 125.0,
            coding_rate: 5,
            preamble_symbols: 8,
        }
    }
}

/// SX1262 transceiver.
pub struct Sx1262Radio<'d> {
    device: Device<SpiDeviceDriver<'d, SpiDriver<'d>>>,
    reset: PinDriver<'d, Gpio12, Output>,
    busy: PinDriver<'d, Gpio13, Input>,
    dio1: PinDriver<'d, Gpio14, Input>,
    modulation: Modulation,
    initialized: bool,
    last_rssi: Option<i16>,
    last_snr: Option<i16>,
}

impl<'d> Sx1262Radio<'d> {
    /// Claim the SPI bus and GPIOs. The radio itself is untouched until
    /// [`RadioPeripheral::initialize`].
    pub fn new(pins: Sx1262Pins) -> Result<Self, RadioError> {
        // SX1262 supports up to 16MHz, use conservative 2MHz
        let spi_config = SpiConfig::new().baudrate(2.MHz().into());
        let driver_config = DriverConfig::new();

        let spi_driver = SpiDriver::new(
            pins.spi,
            pins.sclk,
            pins.mosi,
            Some(pins.miso),
            &driver_config,
        )
        .map_err(RadioError::Spi)?;
        let spi_device =
            SpiDeviceDriver::new(spi_driver, Some(pins.cs), &spi_config).map_err(RadioError::Spi)?;

        let reset = PinDriver::output(pins.reset).map_err(RadioError::Gpio)?;
        let busy = PinDriver::input(pins.busy).map_err(RadioError::Gpio)?;
        let mut dio1 = PinDriver::input(pins.dio1).map_err(RadioError::Gpio)?;
        dio1.set_pull(Pull::Down).map_err(RadioError::Gpio)?;
        dio1.set_interrupt_type(InterruptType::PosEdge)
            .map_err(RadioError::Gpio)?;

        Ok(Self {
            device: Device::new(spi_device),
            reset,
            busy,
            dio1,
            modulation: Modulation::default(),
            initialized: false,
            last_rssi: None,
            last_snr: None,
        })
    }

    fn standby(&mut self) -> Result<(), RadioError> {
        exec!(self, SetStandby {
            config: StandbyConfig::Rc,
        })?;
        Ok(())
    }

    fn clear_irq(&mut self) -> Result<(), RadioError> {
        exec!(self, ClearIrqStatus {
            irq_mask: IrqMask::all(),
        })?;
        Ok(())
    }

    fn configure_irq(&mut self) -> Result<(), RadioError> {
        // CRC errors are latched in the status but only RX done drives DIO1,
        // so a bad packet still raises exactly one notification.
        let irq_mask = IrqMask::TX_DONE | IrqMask::RX_DONE | crc_err() | IrqMask::TIMEOUT;
        exec!(self, SetDioIrqParams {
            config: DioIrqConfig {
                irq_mask,
                dio1_mask: IrqMask::RX_DONE,
                dio2_mask: IrqMask::empty(),
                dio3_mask: IrqMask::empty(),
            },
        })?;
        Ok(())
    }

    fn write_modulation(&mut self) -> Result<(), RadioError> {
        let m = self.modulation;
        let bw = bandwidth_code(m.bandwidth_khz).ok_or(RadioError::InvalidSetting {
            setting: Setting::Bandwidth,
            reason: "not a LoRa bandwidth",
        })?;
        let ldro = LoRaParams {
            spreading_factor: m.spreading_factor,
            bandwidth_hz: (m.bandwidth_khz as f64 * 1000.0).round() as u32,
            coding_rate: m.coding_rate,
            preamble_symbols: m.preamble_symbols,
            explicit_header: true,
            crc_enabled: true,
        }
        .low_data_rate_optimize();
        exec!(self, RawSetModulationParams {
            params: RawLoRaModParams::new(m.spreading_factor, bw, m.coding_rate - 4, ldro),
        })?;
        Ok(())
    }

    fn write_packet_params(&mut self, payload_len: u8) -> Result<(), RadioError> {
        let params = build_lora_packet_params(self.modulation.preamble_symbols, payload_len);
        exec!(self, SetPacketParams { params })?;
        Ok(())
    }

    fn hardware_reset(&mut self) -> Result<(), RadioError> {
        debug!("Resetting radio");
        self.reset.set_low().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(1);
        self.reset.set_high().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(10);
        Ok(())
    }

    /// Wait for the radio to be ready (BUSY pin low).
    fn wait_busy(&self) -> Result<(), RadioError> {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(BUSY_TIMEOUT_MS as u64);

        while self.busy.is_high() {
            if start.elapsed() > timeout {
                return Err(RadioError::Timeout);
            }
            FreeRtos::delay_ms(1);
        }

        Ok(())
    }

    fn wait_tx_done(&mut self) -> Result<(), RadioError> {
        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(TX_TIMEOUT_SECS);

        loop {
            let irq = exec!(self, GetIrqStatus)?;
            if irq.irq_mask.contains(IrqMask::TX_DONE) {
                return self.clear_irq();
            }
            if start.elapsed() > timeout {
                warn!("TX done not signalled within {}s", TX_TIMEOUT_SECS);
                return Err(RadioError::Timeout);
            }
            FreeRtos::delay_ms(1);
        }
    }

    fn require_initialized(&self) -> Result<(), RadioError> {
        if self.initialized {
            Ok(())
        } else {
            Err(RadioError::NotInitialized)
        }
    }
}

impl RadioPeripheral for Sx1262Radio<'_> {
    fn initialize(&mut self) -> Result<(), RadioError> {
        info!("Initializing SX1262 radio");

        self.hardware_reset()?;
        // A radio that never releases BUSY is not there.
        self.wait_busy().map_err(|_| RadioError::Fault(-2))?;

        self.standby()?;
        exec!(self, SetPacketType {
            packet_type: PacketType::LoRa,
        })?;
        self.write_modulation()?;
        self.write_packet_params(RADIO_BUFFER_BYTES as u8)?;
        self.configure_irq()?;

        self.initialized = true;
        Ok(())
    }

    fn set_frequency(&mut self, mhz: f32) -> Result<(), RadioError> {
        self.require_initialized()?;
        if !(150.0..=960.0).contains(&mhz) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::Frequency,
                reason: "outside 150-960 MHz",
            });
        }
        let frequency = (mhz as f64 * 1_000_000.0).round() as u32;
        exec!(self, SetRfFrequency {
            config: RfFrequencyConfig { frequency },
        })?;
        Ok(())
    }

    fn set_bandwidth(&mut self, khz: f32) -> Result<(), RadioError> {
        self.require_initialized()?;
        if bandwidth_code(khz).is_none() {
            return Err(RadioError::InvalidSetting {
                setting: Setting::Bandwidth,
                reason: "not a LoRa bandwidth",
            });
        }
        self.modulation.bandwidth_khz = khz;
        self.write_modulation()
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError> {
        self.require_initialized()?;
        if !(5..=12).contains(&sf) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::SpreadingFactor,
                reason: "outside SF5-SF12",
            });
        }
        self.modulation.spreading_factor = sf;
        self.write_modulation()
    }

    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError> {
        self.require_initialized()?;
        if !(5..=8).contains(&denominator) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::CodingRate,
                reason: "outside 4/5-4/8",
            });
        }
        self.modulation.coding_rate = denominator;
        self.write_modulation()
    }

    fn set_output_power(&mut self, dbm: i8) -> Result<(), RadioError> {
        self.require_initialized()?;
        if !(-9..=22).contains(&dbm) {
            return Err(RadioError::InvalidSetting {
                setting: Setting::OutputPower,
                reason: "outside -9..=22 dBm",
            });
        }
        // High-power PA, +22 dBm capable
        exec!(self, SetPaConfig {
            config: PaConfig {
                duty_cycle: 0x04,
                hp_max: 0x07,
                device_sel: DeviceSelect::Sx1262,
                pa_lut: 0x01,
            },
        })?;
        exec!(self, SetTxParams {
            params: TxParams {
                power: dbm,
                ramp_time: RampTime::Micros200,
            },
        })?;
        Ok(())
    }

    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError> {
        self.require_initialized()?;
        if symbols == 0 {
            return Err(RadioError::InvalidSetting {
                setting: Setting::PreambleLength,
                reason: "must be at least 1 symbol",
            });
        }
        self.modulation.preamble_symbols = symbols;
        self.write_packet_params(RADIO_BUFFER_BYTES as u8)
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        self.require_initialized()?;
        if payload.is_empty() {
            return Err(RadioError::EmptyPacket);
        }
        if payload.len() > RADIO_BUFFER_BYTES {
            return Err(RadioError::PacketTooLarge {
                size: payload.len(),
                max: RADIO_BUFFER_BYTES,
            });
        }

        self.standby()?;
        self.write_packet_params(payload.len() as u8)?;
        self.wait_busy()?;
        self.device
            .write_buffer(0, payload)
            .map_err(RadioError::Command)?;
        self.clear_irq()?;
        exec!(self, SetTx {
            timeout: Timeout(0),
        })?;

        let result = self.wait_tx_done();
        self.standby()?;
        result
    }

    fn start_receive(&mut self) -> Result<(), RadioError> {
        self.require_initialized()?;
        self.write_packet_params(RADIO_BUFFER_BYTES as u8)?;
        self.clear_irq()?;
        exec!(self, SetRx {
            mode: RxMode::Continuous,
        })?;
        // esp-idf-hal disarms the GPIO interrupt each time it fires.
        self.dio1.enable_interrupt().map_err(RadioError::Gpio)?;
        Ok(())
    }

    fn on_packet_ready(&mut self, ready: PacketReady) -> Result<(), RadioError> {
        // SAFETY: the callback runs in ISR context and only performs an
        // atomic store.
        unsafe {
            self.dio1
                .subscribe(move || ready.signal())
                .map_err(RadioError::Gpio)?;
        }
        Ok(())
    }

    fn read_received(&mut self) -> Result<Packet, RadioError> {
        self.require_initialized()?;

        let irq = exec!(self, GetIrqStatus)?.irq_mask;
        if irq.contains(crc_err()) {
            self.clear_irq()?;
            self.standby()?;
            return Err(RadioError::CrcMismatch);
        }
        if !irq.contains(IrqMask::RX_DONE) {
            self.standby()?;
            return Err(RadioError::NoPacket);
        }

        let status = exec!(self, GetRxBufferStatus)?;
        let payload_len = status.buffer_status.payload_length as usize;
        let offset = status.buffer_status.buffer_pointer;

        let mut payload = vec![0u8; payload_len];
        self.wait_busy()?;
        self.device
            .read_buffer(offset, &mut payload)
            .map_err(RadioError::Command)?;

        let packet_status = exec!(self, GetPacketStatus)?;
        self.clear_irq()?;
        self.standby()?;

        // LoRa mode: status[0]=RSSI (-val/2 dBm), status[1]=SNR (val/4 dB)
        let rssi = -(packet_status.packet_status.status[0] as i16) / 2;
        let snr = ((packet_status.packet_status.status[1] as i8) / 4) as i16;
        self.last_rssi = Some(rssi);
        self.last_snr = Some(snr);

        Ok(Packet::received(payload, rssi, snr))
    }

    fn last_rssi(&self) -> Option<i16> {
        self.last_rssi
    }

    fn last_snr(&self) -> Option<i16> {
        self.last_snr
    }
}
