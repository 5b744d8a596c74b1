//! Infrastructure layer for the joiner.
//!
//! `network` drives a join attempt over the transport; `prompt` is the seam
//! to whatever user interface asks for PINs and shows progress.

pub mod network;
pub mod prompt;
