//! peershare-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the simulator binary share the same module tree.

pub mod application;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod test_support;
