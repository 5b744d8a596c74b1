//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the host's TOML configuration and
//! falls back to defaults when no file exists yet (first run).

pub mod config;
