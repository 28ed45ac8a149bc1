//! LoRa link node firmware.
//!
//! One binary, two roles. The role is fixed at build time:
//!
//! ```bash
//! # Receiver (default)
//! cargo espflash flash --bin node --features esp32 --release --monitor
//!
//! # Transmitter
//! cargo espflash flash --bin node --features esp32,role-transmitter --release --monitor
//! ```
//!
//! Use the `host-link` binary to run both roles on the host.

#[cfg(feature = "esp32")]
fn main() {
    use esp_idf_hal::peripherals::Peripherals;
    use log::{error, info, warn};
    use lora_link_esp32::display::{OledDisplay, OledPins, VextRail};
    use lora_link_esp32::link::{boot, run, Role, SessionOptions};
    use lora_link_esp32::lora::{Sx1262Pins, Sx1262Radio};
    use lora_link_esp32::report::{DisplayReporter, LogReporter};

    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let role = Role::default();
    let options = SessionOptions::for_role(role);
    info!("=== LoRa {} starting ===", role);

    let peripherals = match Peripherals::take() {
        Ok(p) => p,
        Err(e) => {
            error!("Peripherals unavailable: {:?}", e);
            halt();
        }
    };
    let pins = peripherals.pins;

    // The OLED sits on Vext; a dark screen must not stop the link.
    // The rail must stay bound for the life of the program.
    let vext = VextRail::new(pins.gpio36).and_then(|mut vext| {
        options.power_up(&mut vext)?;
        Ok(vext)
    });
    let display = match &vext {
        Ok(_) => OledDisplay::new(OledPins {
            i2c: peripherals.i2c0,
            sda: pins.gpio17,
            scl: pins.gpio18,
            reset: pins.gpio21,
        })
        .map_err(|e| warn!("OLED unavailable, logging only: {}", e))
        .ok()
        .map(DisplayReporter::new),
        Err(e) => {
            warn!("Vext rail unavailable, logging only: {}", e);
            None
        }
    };
    let mut reporter = (LogReporter::new(), display);

    let radio = match Sx1262Radio::new(Sx1262Pins {
        spi: peripherals.spi2,
        sclk: pins.gpio9,
        mosi: pins.gpio10,
        miso: pins.gpio11,
        cs: pins.gpio8,
        reset: pins.gpio12,
        busy: pins.gpio13,
        dio1: pins.gpio14,
    }) {
        Ok(radio) => radio,
        Err(e) => {
            error!("SX1262 bus setup failed: {}", e);
            halt();
        }
    };

    match boot(radio, role, &options, &mut reporter) {
        Ok((mut session, mut link)) => run(&mut session, link.as_mut(), &mut reporter),
        // Already reported on the display and the log.
        Err(_) => halt(),
    }
}

/// Stop here for good, keeping the failure screen up.
#[cfg(feature = "esp32")]
fn halt() -> ! {
    loop {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-link' to run the link on the host.");
}
