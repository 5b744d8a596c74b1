//! Network infrastructure for the host.
//!
//! - [`host_session`] owns the hosting lifecycle: claiming the session code,
//!   advertising it through discovery, accepting joiner calls, and the
//!   operator commands (approve, deny, disconnect, stop).
//! - [`join_driver`] runs one task per joiner, feeding transport events,
//!   timers, and operator decisions into the handshake machine and carrying
//!   out the actions it returns.

pub mod host_session;
pub mod join_driver;

pub use host_session::{HostError, HostEvent, HostSession, HostSessionConfig};
