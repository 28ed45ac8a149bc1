//! Periodic transmitter.
//!
//! Each cycle: build the next payload, transmit it once, report the result.
//! The main loop sleeps [`LinkRole::pause`] between cycles; there are no
//! retries and no adaptive timing.

use super::role::{LinkRole, Role};
use super::session::{LinkSession, SessionError};
use crate::lora::RadioPeripheral;
use crate::report::{LinkEvent, StatusReporter};
use std::time::Duration;

/// Text embedded in each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// `Hello world 0.01`, `Hello world 0.02`, ... (grows by 0.01).
    #[default]
    Decimal,
    /// `Hello World! #1`, `Hello World! #2`, ...
    Counter,
}

impl PayloadFormat {
    /// Payload for the `sequence`-th packet (starting at 1).
    pub fn render(self, sequence: u32) -> String {
        match self {
            // Integer hundredths, so the value never drifts.
            Self::Decimal => format!("Hello world {}.{:02}", sequence / 100, sequence % 100),
            Self::Counter => format!("Hello World! #{}", sequence),
        }
    }
}

/// Transmitter state within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterState {
    Idle,
    Sending,
    Reporting,
}

/// Transmitter role.
#[derive(Debug)]
pub struct TransmitterLoop {
    format: PayloadFormat,
    interval: Duration,
    sequence: u32,
    state: TransmitterState,
    sent: u32,
    failed: u32,
}

impl TransmitterLoop {
    pub fn new(format: PayloadFormat, interval: Duration) -> Self {
        Self {
            format,
            interval,
            sequence: 0,
            state: TransmitterState::Idle,
            sent: 0,
            failed: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> TransmitterState {
        self.state
    }

    /// Packets the radio accepted.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// Transmit attempts that failed.
    pub fn failed(&self) -> u32 {
        self.failed
    }

    fn next_payload(&mut self) -> String {
        self.sequence = self.sequence.wrapping_add(1);
        self.format.render(self.sequence)
    }
}

impl<P: RadioPeripheral> LinkRole<P> for TransmitterLoop {
    fn role(&self) -> Role {
        Role::Transmitter
    }

    fn start(
        &mut self,
        _session: &mut LinkSession<P>,
        _reporter: &mut dyn StatusReporter,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    fn step(&mut self, session: &mut LinkSession<P>, reporter: &mut dyn StatusReporter) {
        let payload = self.next_payload();

        self.state = TransmitterState::Sending;
        reporter.report(&LinkEvent::Sending {
            payload: payload.clone(),
        });
        let result = session.transmit(payload.as_bytes());

        self.state = TransmitterState::Reporting;
        match result {
            Ok(airtime) => {
                self.sent += 1;
                reporter.report(&LinkEvent::Sent { payload, airtime });
            }
            Err(e) => {
                self.failed += 1;
                reporter.report(&LinkEvent::SendFailed {
                    payload,
                    error: e.to_string(),
                });
            }
        }

        self.state = TransmitterState::Idle;
    }

    fn pause(&self) -> Duration {
        self.interval
    }
}
