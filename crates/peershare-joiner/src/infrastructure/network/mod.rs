//! Network infrastructure for the joiner.
//!
//! - [`attempt`] is the public entry point: resolve the target, settle the
//!   PIN question, call the host.
//! - [`driver`] runs the negotiation once the call is placed, multiplexing the
//!   host's data connection, the call, and the status countdown into the
//!   joiner handshake machine.

pub mod attempt;
pub mod driver;

pub use attempt::{JoinAttempt, JoinError, JoinRequest};
pub use driver::Admission;
