//! Decentralized session discovery.
//!
//! There is no central server.  Instead, every peer races to claim one
//! well-known transport identity ([`DISCOVERY_PEER_ID`]); the winner becomes
//! the *discovery host* and keeps the [`SessionRegistry`] for everyone else.
//!
//! # How election works (for beginners)
//!
//! 1. A peer that needs the session list calls
//!    [`DiscoveryCoordinator::ensure_host`], which tries to bind the
//!    well-known identity.
//! 2. Exactly one bind succeeds.  Everyone else gets
//!    [`crate::TransportError::IdentityTaken`], which is not a failure: those
//!    peers act as clients and send their requests to the winner.
//! 3. If the winner goes away, its registry goes with it.  The next client
//!    that finds the identity unreachable claims it itself and starts over
//!    with an empty registry.  Hosts re-register as their sessions refresh.
//!
//! Two peers can briefly both believe they hold the role if one of them is
//! mid-departure; the registry is a best-effort cache, not a source of truth.

pub mod coordinator;
pub mod registry;

pub use coordinator::{
    Clock, DiscoveryConfig, DiscoveryCoordinator, DiscoveryError, DISCOVERY_PEER_ID,
};
pub use registry::{apply_request, SessionRegistry, SESSION_LIFETIME, SWEEP_INTERVAL};
