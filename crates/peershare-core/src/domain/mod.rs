//! Domain entities for Peershare.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: no transport, no tasks, no clocks other than the caller's.
//!
//! # What lives here? (for beginners)
//!
//! - [`session::SessionCode`] – the short code a host shares with joiners.  It
//!   is also the host's transport identity, so "knowing the code" and "being
//!   able to connect" are the same thing.
//! - [`session::SessionRecord`] – one row of the discovery registry.
//! - [`link`] – turning share links into codes and back.
//!
//! Code in outer layers depends on the domain, but the domain never depends
//! on them.  This keeps these types easy to unit-test in isolation.

pub mod link;
pub mod session;

pub use link::{parse_join_target, share_link, JoinTargetError};
pub use session::{current_timestamp_ms, SessionCode, SessionRecord, CODE_ALPHABET, CODE_LENGTH};
