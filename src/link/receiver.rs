//! Interrupt-driven receiver.
//!
//! The radio stays in continuous receive. Each poll checks the packet-ready
//! flag; when it is set the packet is drained, reported, and receive is
//! re-armed before the next poll.

use super::role::{LinkRole, Role};
use super::session::{LinkSession, SessionError};
use crate::lora::{RadioError, RadioPeripheral};
use crate::report::{LinkEvent, StatusReporter};
use log::{debug, trace};
use std::time::Duration;

/// Receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Armed, waiting for the ready flag.
    Listening,
    /// Reading the buffered packet.
    Draining,
    /// Re-arming failed; retried on the next poll.
    Rearming,
}

/// Receiver role.
#[derive(Debug)]
pub struct ReceiverLoop {
    poll_interval: Duration,
    state: ReceiverState,
    received: u32,
    crc_errors: u32,
    failed: u32,
}

impl ReceiverLoop {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            state: ReceiverState::Listening,
            received: 0,
            crc_errors: 0,
            failed: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Packets drained successfully.
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Packets dropped for a bad CRC.
    pub fn crc_errors(&self) -> u32 {
        self.crc_errors
    }

    /// Drains that failed for any other reason.
    pub fn failed(&self) -> u32 {
        self.failed
    }

    fn rearm<P: RadioPeripheral>(
        &mut self,
        session: &mut LinkSession<P>,
        reporter: &mut dyn StatusReporter,
    ) {
        match session.arm() {
            Ok(()) => self.state = ReceiverState::Listening,
            Err(e) => {
                self.state = ReceiverState::Rearming;
                reporter.report(&LinkEvent::RearmFailed {
                    error: e.to_string(),
                });
            }
        }
    }
}

impl<P: RadioPeripheral> LinkRole<P> for ReceiverLoop {
    fn role(&self) -> Role {
        Role::Receiver
    }

    fn start(
        &mut self,
        session: &mut LinkSession<P>,
        reporter: &mut dyn StatusReporter,
    ) -> Result<(), SessionError> {
        session.arm().map_err(SessionError::Arm)?;
        self.state = ReceiverState::Listening;
        reporter.report(&LinkEvent::Listening);
        Ok(())
    }

    fn step(&mut self, session: &mut LinkSession<P>, reporter: &mut dyn StatusReporter) {
        if self.state == ReceiverState::Rearming {
            debug!("retrying receive arm");
            self.rearm(session, reporter);
            return;
        }

        if !session.take_ready() {
            trace!("no packet");
            return;
        }

        self.state = ReceiverState::Draining;
        match session.drain() {
            Ok(packet) => {
                self.received += 1;
                reporter.report(&LinkEvent::Received(packet));
            }
            Err(RadioError::NoPacket) => debug!("ready flag raised with nothing buffered"),
            Err(e) if e.is_crc_mismatch() => {
                self.crc_errors += 1;
                reporter.report(&LinkEvent::CrcMismatch);
            }
            Err(e) => {
                self.failed += 1;
                reporter.report(&LinkEvent::ReceiveFailed {
                    error: e.to_string(),
                });
            }
        }

        self.rearm(session, reporter);
    }

    fn pause(&self) -> Duration {
        self.poll_interval
    }
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::link::{PayloadFormat, TransmitterLoop};
    use crate::lora::sim::{LinkQuality, SimulatedAir, SimulatedRadio};
    use crate::lora::{Packet, RadioConfig};
    use lora_link_esp32_macros::tap_test;

    #[tap_test]
    fn receiver_hears_transmitter_on_shared_air() {
        let air = SimulatedAir::new();
        let quality = LinkQuality::default();
        let mut events: Vec<LinkEvent> = Vec::new();

        let mut rx_session = LinkSession::start(
            SimulatedRadio::on_air(&air, quality),
            RadioConfig::for_role(Role::Receiver),
            &mut events,
        )
        .ok()
        .unwrap();
        let mut tx_session = LinkSession::start(
            SimulatedRadio::on_air(&air, quality),
            RadioConfig::for_role(Role::Transmitter),
            &mut events,
        )
        .ok()
        .unwrap();

        let mut rx = ReceiverLoop::new(Duration::from_millis(10));
        let mut tx = TransmitterLoop::new(PayloadFormat::Counter, Duration::from_secs(1));
        rx.start(&mut rx_session, &mut events).unwrap();

        for _ in 0..3 {
            tx.step(&mut tx_session, &mut events);
            rx.step(&mut rx_session, &mut events);
        }
        assert_eq!(rx.received(), 3);
        assert!(events.contains(&LinkEvent::Received(Packet::received(
            b"Hello World! #3".to_vec(),
            quality.rssi_dbm,
            quality.snr_db
        ))));
    }
}
