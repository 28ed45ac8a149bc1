//! Heltec V3 board peripherals: the SSD1306 OLED and the Vext power rail.
//!
//! | Signal | GPIO | Notes |
//! |--------|------|-------|
//! | OLED SDA | 17 | I2C0, address 0x3C |
//! | OLED SCL | 18 | |
//! | OLED RST | 21 | Active low |
//! | Vext | 36 | Active low, powers the OLED |

use crate::link::AuxPower;
use crate::lora::RadioError;
use crate::report::StatusDisplay;
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle, MonoTextStyleBuilder},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{Gpio17, Gpio18, Gpio21, Gpio36, Output, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver, I2C0};
use esp_idf_hal::units::FromValueType;
use log::{debug, warn};
use ssd1306::{mode::BufferedGraphicsMode, prelude::*, I2CDisplayInterface, Ssd1306};

type Panel<'d> = Ssd1306<
    I2CInterface<I2cDriver<'d>>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

/// GPIOs wired to the OLED.
pub struct OledPins {
    pub i2c: I2C0,
    pub sda: Gpio17,
    pub scl: Gpio18,
    pub reset: Gpio21,
}

/// 128x64 SSD1306 text display.
///
/// Draw errors are logged and otherwise ignored; the link never depends on
/// the screen.
pub struct OledDisplay<'d> {
    panel: Panel<'d>,
    style: MonoTextStyle<'static, BinaryColor>,
    // Held high for as long as the panel is in use.
    _reset: PinDriver<'d, Gpio21, Output>,
}

impl<'d> OledDisplay<'d> {
    /// Reset and initialize the panel. Vext must already be on.
    pub fn new(pins: OledPins) -> Result<Self, RadioError> {
        let mut reset = PinDriver::output(pins.reset).map_err(RadioError::Gpio)?;
        reset.set_low().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(10);
        reset.set_high().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(10);

        let config = I2cConfig::new().baudrate(500.kHz().into());
        let i2c =
            I2cDriver::new(pins.i2c, pins.sda, pins.scl, &config).map_err(RadioError::Gpio)?;

        let interface = I2CDisplayInterface::new(i2c);
        let mut panel = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        if let Err(e) = panel.init() {
            warn!("OLED init failed: {:?}", e);
        }
        if let Err(e) = panel.set_brightness(Brightness::BRIGHTEST) {
            debug!("OLED brightness not set: {:?}", e);
        }

        let style = MonoTextStyleBuilder::new()
            .font(&FONT_6X10)
            .text_color(BinaryColor::On)
            .build();

        Ok(Self {
            panel,
            style,
            _reset: reset,
        })
    }
}

impl StatusDisplay for OledDisplay<'_> {
    fn clear(&mut self) {
        self.panel.clear_buffer();
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str) {
        let result = Text::with_baseline(text, Point::new(x, y), self.style, Baseline::Top)
            .draw(&mut self.panel);
        if let Err(e) = result {
            debug!("OLED draw failed: {:?}", e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.panel.flush() {
            debug!("OLED flush failed: {:?}", e);
        }
    }
}

/// Switchable Vext rail.
pub struct VextRail<'d> {
    pin: PinDriver<'d, Gpio36, Output>,
}

impl<'d> VextRail<'d> {
    pub fn new(pin: Gpio36) -> Result<Self, RadioError> {
        let pin = PinDriver::output(pin).map_err(RadioError::Gpio)?;
        Ok(Self { pin })
    }
}

impl AuxPower for VextRail<'_> {
    fn enable(&mut self) -> Result<(), RadioError> {
        // Active low
        self.pin.set_low().map_err(RadioError::Gpio)
    }
}
