//! TAP test runner binary.
//!
//! Runs all tests registered with `#[tap_test]` and outputs TAP format.
//!
//! # Usage
//!
//! ```bash
//! # Run on host (optionally only tests whose name contains FILTER)
//! cargo run --bin device-tests --features tap-tests -- [FILTER]
//!
//! # Flash to the Heltec V3 and watch the serial console
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }
    #[cfg(not(feature = "esp32"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let filter = std::env::args().nth(1);
    let success = lora_link_esp32::testing::run_matching(filter.as_deref());

    #[cfg(feature = "esp32")]
    {
        log::info!("Tests complete. Halting.");
        let _ = success;
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}
