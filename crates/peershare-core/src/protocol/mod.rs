//! Protocol module containing the JSON message types and the codec.

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, ProtocolError, MAX_PAYLOAD_BYTES};
pub use messages::*;
