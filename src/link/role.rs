//! Role selection and the main loop.
//!
//! A node is either a transmitter or a receiver, fixed before it starts.
//! Both roles implement [`LinkRole`]; [`boot`] brings the session up and
//! hands back the role to drive, [`run`] drives it forever.

use super::receiver::ReceiverLoop;
use super::session::{LinkSession, SessionError, SessionOptions};
use super::transmitter::{PayloadFormat, TransmitterLoop};
use crate::lora::{RadioConfig, RadioPeripheral};
use crate::report::{LinkEvent, StatusReporter};
use log::info;
use std::fmt;
use std::time::Duration;

/// Which side of the link this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Transmitter,
    Receiver,
}

impl Role {
    /// Short tag used on the display ("TX" / "RX").
    pub fn tag(self) -> &'static str {
        match self {
            Self::Transmitter => "TX",
            Self::Receiver => "RX",
        }
    }
}

#[cfg(all(feature = "role-transmitter", feature = "role-receiver"))]
compile_error!("features `role-transmitter` and `role-receiver` are mutually exclusive");

impl Default for Role {
    fn default() -> Self {
        #[cfg(feature = "role-transmitter")]
        return Self::Transmitter;
        #[cfg(not(feature = "role-transmitter"))]
        Self::Receiver
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transmitter => f.write_str("Transmitter"),
            Self::Receiver => f.write_str("Receiver"),
        }
    }
}

/// Behaviour of one role, driven by the main loop.
pub trait LinkRole<P: RadioPeripheral> {
    /// Which role this is.
    fn role(&self) -> Role;

    /// One-time setup after the session is configured. Failure is fatal.
    fn start(
        &mut self,
        session: &mut LinkSession<P>,
        reporter: &mut dyn StatusReporter,
    ) -> Result<(), SessionError>;

    /// One main-loop iteration.
    fn step(&mut self, session: &mut LinkSession<P>, reporter: &mut dyn StatusReporter);

    /// Delay between iterations.
    fn pause(&self) -> Duration;
}

/// Build the loop for `role`.
pub fn role_loop<P: RadioPeripheral>(
    role: Role,
    options: &SessionOptions,
) -> Box<dyn LinkRole<P>> {
    match role {
        Role::Transmitter => Box::new(TransmitterLoop::new(
            PayloadFormat::default(),
            options.tx_interval,
        )),
        Role::Receiver => Box::new(ReceiverLoop::new(options.rx_poll_interval)),
    }
}

/// Bring the node up: start the session, then the role.
///
/// Every fatal fault is reported as [`LinkEvent::Fatal`] before it is
/// returned; the caller is expected to halt.
pub fn boot<P: RadioPeripheral>(
    radio: P,
    role: Role,
    options: &SessionOptions,
    reporter: &mut dyn StatusReporter,
) -> Result<(LinkSession<P>, Box<dyn LinkRole<P>>), SessionError> {
    reporter.report(&LinkEvent::Initializing {
        role,
        banner: options.banner.clone(),
    });

    let result = start_role(radio, role, options, reporter);
    if let Err(e) = &result {
        reporter.report(&LinkEvent::Fatal {
            code: e.code(),
            message: e.to_string(),
        });
    }
    result
}

fn start_role<P: RadioPeripheral>(
    radio: P,
    role: Role,
    options: &SessionOptions,
    reporter: &mut dyn StatusReporter,
) -> Result<(LinkSession<P>, Box<dyn LinkRole<P>>), SessionError> {
    let config = RadioConfig::for_role(role);
    let mut session = LinkSession::start(radio, config, reporter)?;
    reporter.report(&LinkEvent::Ready { role, config });
    if !options.ready_hold.is_zero() {
        std::thread::sleep(options.ready_hold);
    }

    let mut link = role_loop(role, options);
    link.start(&mut session, reporter)?;
    Ok((session, link))
}

/// Drive `link` until the process ends.
pub fn run<P: RadioPeripheral>(
    session: &mut LinkSession<P>,
    link: &mut dyn LinkRole<P>,
    reporter: &mut dyn StatusReporter,
) -> ! {
    info!("{} loop running", link.role());
    loop {
        link.step(session, reporter);
        std::thread::sleep(link.pause());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::sim::{Call, LinkQuality, SimFault, SimulatedAir, SimulatedRadio};

    fn quiet(role: Role) -> SessionOptions {
        SessionOptions {
            ready_hold: Duration::ZERO,
            ..SessionOptions::for_role(role)
        }
    }

    #[test]
    fn test_default_role() {
        #[cfg(not(feature = "role-transmitter"))]
        assert_eq!(Role::default(), Role::Receiver);
        #[cfg(feature = "role-transmitter")]
        assert_eq!(Role::default(), Role::Transmitter);
        // Explicitly asking for a receiver gives one.
        #[cfg(feature = "role-receiver")]
        assert_eq!(Role::default(), Role::Receiver);
    }

    #[test]
    fn test_fatal_init_halts_before_either_loop() {
        for role in [Role::Transmitter, Role::Receiver] {
            let radio = SimulatedRadio::new();
            let handle = radio.handle();
            handle.fail_initialize(SimFault::Code(-2));

            let mut events: Vec<LinkEvent> = Vec::new();
            let result = boot(radio, role, &quiet(role), &mut events);

            assert!(matches!(result, Err(SessionError::Init(_))));
            assert_eq!(handle.calls(), vec![Call::Initialize]);
            assert!(handle.sent().is_empty());
            assert_eq!(handle.count(Call::StartReceive), 0);
            assert_eq!(
                events.last(),
                Some(&LinkEvent::Fatal {
                    code: -2,
                    message: "radio init failed: code -2".into()
                })
            );
            assert!(!events
                .iter()
                .any(|e| matches!(e, LinkEvent::Ready { .. })));
        }
    }

    #[test]
    fn test_receiver_arm_failure_is_fatal() {
        let radio = SimulatedRadio::new();
        let handle = radio.handle();
        handle.fail_next_start_receive(SimFault::Timeout);

        let mut events: Vec<LinkEvent> = Vec::new();
        let result = boot(radio, Role::Receiver, &quiet(Role::Receiver), &mut events);

        assert!(matches!(result, Err(SessionError::Arm(_))));
        assert!(matches!(events.last(), Some(LinkEvent::Fatal { code: -5, .. })));
    }

    #[test]
    fn test_boot_uses_role_power() {
        let tx = SimulatedRadio::new();
        let tx_handle = tx.handle();
        let mut events: Vec<LinkEvent> = Vec::new();
        let (_, link) = boot(tx, Role::Transmitter, &quiet(Role::Transmitter), &mut events)
            .ok()
            .unwrap();
        assert_eq!(link.role(), Role::Transmitter);
        assert_eq!(tx_handle.output_power(), Some(5));

        let rx = SimulatedRadio::new();
        let rx_handle = rx.handle();
        let (_, link) = boot(rx, Role::Receiver, &quiet(Role::Receiver), &mut events)
            .ok()
            .unwrap();
        assert_eq!(link.role(), Role::Receiver);
        assert_eq!(rx_handle.output_power(), Some(14));
        assert!(rx_handle.is_armed());
    }

    #[test]
    fn test_round_trip_over_air() {
        let air = SimulatedAir::new();
        let quality = LinkQuality {
            rssi_dbm: -42,
            snr_db: 9,
        };
        let tx_radio = SimulatedRadio::on_air(&air, quality);
        let rx_radio = SimulatedRadio::on_air(&air, quality);
        let rx_handle = rx_radio.handle();

        let mut tx_events: Vec<LinkEvent> = Vec::new();
        let mut rx_events: Vec<LinkEvent> = Vec::new();
        let (mut rx_session, mut receiver) = boot(
            rx_radio,
            Role::Receiver,
            &quiet(Role::Receiver),
            &mut rx_events,
        )
        .ok()
        .unwrap();
        let (mut tx_session, mut transmitter) = boot(
            tx_radio,
            Role::Transmitter,
            &quiet(Role::Transmitter),
            &mut tx_events,
        )
        .ok()
        .unwrap();

        transmitter.step(&mut tx_session, &mut tx_events);
        assert!(tx_events.contains(&LinkEvent::Sending {
            payload: "Hello world 0.01".into()
        }));

        rx_events.clear();
        receiver.step(&mut rx_session, &mut rx_events);

        assert_eq!(
            rx_events,
            vec![LinkEvent::Received(crate::lora::Packet::received(
                b"Hello world 0.01".to_vec(),
                -42,
                9
            ))]
        );
        assert!(rx_session.is_armed());
        assert!(rx_handle.is_armed());
    }
}
