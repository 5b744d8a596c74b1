//! Application layer for the host.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules) and the infrastructure (tasks, transport, storage).
//! Nothing in here spawns a task, sleeps, or touches the network; the
//! handshake machine, for example, only *asks* for timers and messages by
//! returning actions, and the infrastructure layer carries them out.
//!
//! # Sub-modules
//!
//! - **`policy`** – The host's session policy: optional PIN, privacy flag,
//!   display name.
//!
//! - **`handshake`** – The per-joiner admission state machine (PIN check,
//!   name exchange, operator approval).
//!
//! - **`participants`** – The table of admitted participants and the
//!   snapshot type for joiners waiting on approval.

pub mod handshake;
pub mod participants;
pub mod policy;
