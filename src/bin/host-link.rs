//! Host-side link demo.
//!
//! Runs a transmitter and a receiver in one process, each on its own thread,
//! talking over a simulated channel. Transmit blocks for the real time on
//! air, so the log reads like two boards side by side.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-link
//! RUST_LOG=debug cargo run --bin host-link
//! ```

use log::{error, info};
use lora_link_esp32::link::{boot, run, Role, SessionOptions};
use lora_link_esp32::lora::sim::{LinkQuality, SimulatedAir, SimulatedRadio};
use lora_link_esp32::report::LogReporter;
use std::thread;
use std::time::Duration;

/// Gives the receiver time to arm before the first packet goes out.
const TX_START_DELAY: Duration = Duration::from_secs(1);

fn spawn_node(
    role: Role,
    radio: SimulatedRadio,
    start_delay: Duration,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(role.tag().to_lowercase())
        .spawn(move || {
            thread::sleep(start_delay);
            let options = SessionOptions::for_role(role);
            let mut reporter = LogReporter::with_label(role.tag());
            match boot(radio, role, &options, &mut reporter) {
                Ok((mut session, mut link)) => run(&mut session, link.as_mut(), &mut reporter),
                Err(e) => error!("{} halted: {}", role, e),
            }
        })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== LoRa link (simulated) starting ===");

    let air = SimulatedAir::new();
    let quality = LinkQuality {
        rssi_dbm: -47,
        snr_db: 10,
    };
    let rx = SimulatedRadio::on_air(&air, quality);
    let tx = SimulatedRadio::on_air(&air, quality).realtime(true);

    let nodes = [
        spawn_node(Role::Receiver, rx, Duration::ZERO),
        spawn_node(Role::Transmitter, tx, TX_START_DELAY),
    ];

    info!("Running (Ctrl+C to exit)...");
    for node in nodes {
        match node {
            Ok(handle) => {
                if handle.join().is_err() {
                    error!("node thread panicked");
                }
            }
            Err(e) => {
                error!("failed to start node thread: {}", e);
                std::process::exit(1);
            }
        }
    }
}
