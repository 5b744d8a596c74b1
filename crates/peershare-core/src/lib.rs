//! # peershare-core
//!
//! Shared library for Peershare containing the JSON wire protocol, the session
//! domain types, the transport contract, and decentralized session discovery.
//!
//! This crate is used by both the host and the joiner applications.
//!
//! # Architecture overview (for beginners)
//!
//! Peershare lets one device (the *host*) share a live capture with other
//! devices (*joiners*) over direct peer links.  There is no central server:
//!
//! - **`protocol`** – The JSON messages exchanged on data connections, both
//!   for discovery (`register`, `list`, …) and for the join handshake
//!   (`pin_request`, `name_request`, `approval_*`).
//!
//! - **`domain`** – Session codes (the short shareable identifier that doubles
//!   as the host's transport identity), session records, and share links.
//!
//! - **`transport`** – The point-to-point transport contract the rest of the
//!   system is written against, plus an in-process implementation used by
//!   tests and the simulator.
//!
//! - **`discovery`** – Elects one peer per network to hold the shared session
//!   registry and routes register/unregister/list requests to it.

pub mod discovery;
pub mod domain;
pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `peershare_core::SessionCode` instead of the full module path.
pub use discovery::{DiscoveryConfig, DiscoveryCoordinator, DiscoveryError, SessionRegistry};
pub use domain::session::{current_timestamp_ms, SessionCode, SessionRecord};
pub use protocol::codec::{decode, encode, ProtocolError};
pub use protocol::messages::{DiscoveryMessage, HandshakeMessage};
pub use transport::{PeerId, Transport, TransportError};
