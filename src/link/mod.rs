//! Point-to-point link logic.
//!
//! - [`session`]: the configured radio, shared by both roles
//! - [`transmitter`]: periodic sender
//! - [`receiver`]: interrupt-driven listener
//! - [`role`]: role selection, startup and the main loop

mod receiver;
mod role;
mod session;
mod transmitter;

pub use receiver::{ReceiverLoop, ReceiverState};
pub use role::{boot, role_loop, run, LinkRole, Role};
pub use session::{
    AuxPower, LinkSession, NoAuxPower, SessionError, SessionOptions, AUX_POWER_SETTLE,
    RX_POLL_INTERVAL, TX_INTERVAL,
};
pub use transmitter::{PayloadFormat, TransmitterLoop, TransmitterState};
