//! Application layer for the joiner.
//!
//! - **`handshake`** – The joiner's side of the admission negotiation as a
//!   pure state machine: messages in, replies and outcomes out.
//!
//! - **`connection_status`** – The countdown shown while a join is in
//!   progress: stage label, elapsed and remaining time, warnings, timeout.

pub mod connection_status;
pub mod handshake;
