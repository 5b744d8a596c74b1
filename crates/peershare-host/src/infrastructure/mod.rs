//! Infrastructure layer for the host.
//!
//! Contains the adapters that do I/O: the hosting lifecycle and per-joiner
//! drivers on top of the transport, and TOML configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `peershare_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
